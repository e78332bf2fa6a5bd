use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use minijinja::{Environment, Value};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::cache::ScholarCache;
use super::types::{MetricsSnapshot, PublicationRecord};

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
style-src 'self' 'unsafe-inline' https://fonts.googleapis.com https://cdnjs.cloudflare.com https://cdn.jsdelivr.net; \
font-src 'self' https://fonts.gstatic.com https://cdnjs.cloudflare.com https://cdn.jsdelivr.net; \
script-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net; \
img-src 'self' data: https:; \
media-src 'self' blob: data:; \
connect-src 'self'; \
frame-src 'self' https://view.officeapps.live.com";

const GALLERY_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const TEMPLATES: [(&str, &str); 11] = [
    ("base.html", include_str!("../../templates/base.html")),
    ("index.html", include_str!("../../templates/index.html")),
    ("research.html", include_str!("../../templates/research.html")),
    ("seawater-robot.html", include_str!("../../templates/seawater-robot.html")),
    (
        "magnetic-drug-targeting.html",
        include_str!("../../templates/magnetic-drug-targeting.html"),
    ),
    (
        "medical-image-processing.html",
        include_str!("../../templates/medical-image-processing.html"),
    ),
    ("covid-research.html", include_str!("../../templates/covid-research.html")),
    ("publications.html", include_str!("../../templates/publications.html")),
    ("teaching.html", include_str!("../../templates/teaching.html")),
    ("gallery.html", include_str!("../../templates/gallery.html")),
    ("contact.html", include_str!("../../templates/contact.html")),
];

#[derive(Debug)]
struct Page {
    path: &'static str,
    template: &'static str,
    /// `None` marks the home page, which carries the owner's headline instead.
    heading: Option<&'static str>,
    nav: &'static str,
}

const HOME: Page = Page {
    path: "/",
    template: "index.html",
    heading: None,
    nav: "home",
};
const PUBLICATIONS: Page = Page {
    path: "/publications",
    template: "publications.html",
    heading: Some("Publications"),
    nav: "publications",
};
const GALLERY: Page = Page {
    path: "/gallery",
    template: "gallery.html",
    heading: Some("Gallery"),
    nav: "gallery",
};

static PLAIN_PAGES: [Page; 8] = [
    HOME,
    Page {
        path: "/research",
        template: "research.html",
        heading: Some("Research"),
        nav: "research",
    },
    Page {
        path: "/research/seawater-robot",
        template: "seawater-robot.html",
        heading: Some("Sea Water Robot"),
        nav: "research",
    },
    Page {
        path: "/research/magnetic-drug-targeting",
        template: "magnetic-drug-targeting.html",
        heading: Some("Magnetic Drug Targeting"),
        nav: "research",
    },
    Page {
        path: "/research/medical-image-processing",
        template: "medical-image-processing.html",
        heading: Some("Medical Image Processing"),
        nav: "research",
    },
    Page {
        path: "/research/covid-research",
        template: "covid-research.html",
        heading: Some("COVID-19 Research"),
        nav: "research",
    },
    Page {
        path: "/teaching",
        template: "teaching.html",
        heading: Some("Teaching"),
        nav: "teaching",
    },
    Page {
        path: "/contact",
        template: "contact.html",
        heading: Some("Contact"),
        nav: "contact",
    },
];

#[derive(Clone)]
pub struct SiteState {
    cache: Arc<ScholarCache>,
    templates: Arc<Environment<'static>>,
    owner: Arc<str>,
    gallery_dir: Arc<Path>,
}

impl SiteState {
    pub fn new(
        cache: Arc<ScholarCache>,
        owner: &str,
        public_dir: &Path,
    ) -> Result<Self, minijinja::Error> {
        Ok(Self {
            cache,
            templates: Arc::new(build_templates()?),
            owner: Arc::from(owner),
            gallery_dir: Arc::from(public_dir.join("img").join("gallery")),
        })
    }
}

fn build_templates() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)?;
    }
    Ok(env)
}

fn page_title(page: &Page, owner: &str) -> String {
    match page.heading {
        Some(heading) => format!("{heading} - {owner}"),
        None => format!("{owner} - PhD in Civil Engineering"),
    }
}

fn render_page(state: &SiteState, page: &Page, extra: Vec<(&'static str, Value)>) -> Response {
    let metrics = state.cache.read();
    let mut ctx = BTreeMap::from([
        ("title", Value::from(page_title(page, &state.owner))),
        ("page", Value::from(page.nav)),
        ("owner", Value::from(&*state.owner)),
        ("scholar_metrics", Value::from_serialize(&metrics)),
    ]);
    ctx.extend(extra);

    let rendered = state
        .templates
        .get_template(page.template)
        .and_then(|template| template.render(&ctx));
    match rendered {
        Ok(body) => Html(body).into_response(),
        Err(err) => {
            error!(template = page.template, error = %err, "template render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render page").into_response()
        }
    }
}

async fn api_scholar_metrics(State(state): State<SiteState>) -> Json<MetricsSnapshot> {
    Json(state.cache.read())
}

async fn api_publications(State(state): State<SiteState>) -> Json<Vec<PublicationRecord>> {
    Json(state.cache.read_publications().to_vec())
}

async fn publications_page(State(state): State<SiteState>) -> Response {
    let publications = state.cache.read_publications();
    render_page(
        &state,
        &PUBLICATIONS,
        vec![("publications", Value::from_serialize(publications.as_slice()))],
    )
}

async fn gallery_page(State(state): State<SiteState>) -> Response {
    let images = gallery_images(&state.gallery_dir);
    render_page(
        &state,
        &GALLERY,
        vec![("images", Value::from_serialize(&images))],
    )
}

/// Public URLs of the gallery images, sorted by file name. An absent or
/// unreadable folder is an empty gallery.
pub fn gallery_images(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "failed to read gallery folder");
            return Vec::new();
        }
    };

    let mut names = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_gallery_image(name))
        .collect::<Vec<_>>();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("/img/gallery/{name}"))
        .collect()
}

fn is_gallery_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            GALLERY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn build_router(state: SiteState, public_dir: PathBuf, img_dir: PathBuf) -> Router {
    let mut app = Router::new()
        .route("/api/scholar-metrics", get(api_scholar_metrics))
        .route("/api/publications", get(api_publications))
        .route(PUBLICATIONS.path, get(publications_page))
        .route(GALLERY.path, get(gallery_page));

    for page in PLAIN_PAGES.iter() {
        app = app.route(
            page.path,
            get(move |State(state): State<SiteState>| async move {
                render_page(&state, page, Vec::new())
            }),
        );
    }

    // `/img` resolves against the public tree first, like every other asset.
    let images = ServeDir::new(public_dir.join("img")).fallback(ServeDir::new(img_dir));
    app.nest_service("/img", images)
        .fallback_service(ServeDir::new(public_dir))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: &str, app: Router) -> io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::Utc;

    use super::*;

    fn state(public_dir: &Path) -> SiteState {
        SiteState::new(Arc::new(ScholarCache::new()), "Abbas Sharifi", public_dir).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn every_template_compiles() {
        let env = build_templates().unwrap();
        for (name, _) in TEMPLATES {
            assert!(env.get_template(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn titles_follow_page_heading() {
        assert_eq!(
            page_title(&HOME, "Abbas Sharifi"),
            "Abbas Sharifi - PhD in Civil Engineering"
        );
        assert_eq!(
            page_title(&PUBLICATIONS, "Abbas Sharifi"),
            "Publications - Abbas Sharifi"
        );
    }

    #[tokio::test]
    async fn pages_render_with_zeroed_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        for page in PLAIN_PAGES.iter() {
            let response = render_page(&state, page, Vec::new());
            assert_eq!(response.status(), StatusCode::OK, "{}", page.path);
        }
        let home = body_text(render_page(&state, &HOME, Vec::new())).await;
        assert!(home.contains("Abbas Sharifi - PhD in Civil Engineering"));
        assert!(home.contains("data-citations=\"0\""));
    }

    #[tokio::test]
    async fn publications_page_lists_cached_records() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        state.cache.replace(
            MetricsSnapshot {
                publication_count: 1,
                citation_count: 1234,
                last_updated: Some(Utc::now()),
                ..MetricsSnapshot::default()
            },
            vec![PublicationRecord {
                title: "Seawater robot navigation".to_string(),
                authors: "A Sharifi".to_string(),
                venue: "Ocean Engineering".to_string(),
                year: 2022,
                cited_by_count: 12,
                source_link: "https://scholar.google.com/citations?x=1".to_string(),
            }],
        );

        let body = body_text(publications_page(State(state.clone())).await).await;
        assert!(body.contains("Seawater robot navigation"));
        assert!(body.contains("Ocean Engineering"));
        assert!(body.contains("data-citations=\"1234\""));

        let Json(metrics) = api_scholar_metrics(State(state.clone())).await;
        assert_eq!(metrics.citation_count, 1234);
        let Json(records) = api_publications(State(state)).await;
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn snapshot_json_uses_public_field_names() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "publications": 0,
                "citations": 0,
                "hIndex": 0,
                "i10Index": 0,
                "lastUpdated": null
            })
        );
        let failed = serde_json::to_value(MetricsSnapshot::failed("boom")).unwrap();
        assert_eq!(failed["error"], "boom");
    }

    #[test]
    fn gallery_lists_only_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.webp", "noext"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        assert_eq!(
            gallery_images(dir.path()),
            vec![
                "/img/gallery/a.jpg".to_string(),
                "/img/gallery/b.PNG".to_string(),
                "/img/gallery/c.webp".to_string(),
            ]
        );
    }

    #[test]
    fn missing_gallery_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(gallery_images(&dir.path().join("absent")).is_empty());
    }

    #[tokio::test]
    async fn gallery_page_renders_images() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = dir.path().join("img").join("gallery");
        fs::create_dir_all(&gallery).unwrap();
        fs::write(gallery.join("lab.jpg"), b"x").unwrap();

        let body = body_text(gallery_page(State(state(dir.path()))).await).await;
        assert!(body.contains("lab.jpg"));
        assert!(!body.contains("No images yet."));
    }

    #[test]
    fn router_builds() {
        let dir = tempfile::tempdir().unwrap();
        let _ = build_router(
            state(dir.path()),
            dir.path().to_path_buf(),
            dir.path().join("img"),
        );
    }
}
