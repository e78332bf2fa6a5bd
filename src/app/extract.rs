use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::types::{ListingPage, PublicationRecord, RowFields, SummaryStats};

// Structural paths into the profile page.
const SUMMARY_ROWS: &str = "#gsc_rsb_st tbody tr";
const SUMMARY_CELLS: &str = "td";
const SUMMARY_VALUE_COLUMN: usize = 1;
const LISTING_ROWS: &str = "#gsc_a_t tr.gsc_a_tr";
const ROW_TITLE: &str = ".gsc_a_t a";
const ROW_GRAY: &str = ".gs_gray";
const ROW_YEAR: &str = ".gsc_a_y span";
const ROW_CITED_BY: &str = ".gsc_a_c a";
const MORE_BUTTON: &str = "#gsc_bpf_more";

fn selector(path: &str) -> Option<Selector> {
    Selector::parse(path).ok()
}

fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

/// Text of the `nth` match of `path` under `root`, or empty.
fn nth_text(root: ElementRef<'_>, path: &str, nth: usize) -> String {
    let Some(sel) = selector(path) else {
        return String::new();
    };
    root.select(&sel).nth(nth).map(element_text).unwrap_or_default()
}

fn first_attr(root: ElementRef<'_>, path: &str, attr: &str) -> String {
    let Some(sel) = selector(path) else {
        return String::new();
    };
    root.select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn or_zero(value: String) -> String {
    if value.is_empty() {
        "0".to_string()
    } else {
        value
    }
}

/// Lenient integer parse: thousands separators are dropped and the leading
/// run of digits is used. Anything else, including an empty field, is 0.
pub fn parse_count(raw: &str) -> u64 {
    let cleaned = raw.replace(',', "");
    let digits = cleaned
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    digits.parse::<u64>().unwrap_or(0)
}

pub fn parse_year(raw: &str) -> u32 {
    u32::try_from(parse_count(raw)).unwrap_or(0)
}

pub fn parse_summary(html: &str) -> SummaryStats {
    let doc = Html::parse_document(html);
    let value_at = |row: usize| -> String {
        let Some(rows) = selector(SUMMARY_ROWS) else {
            return "0".to_string();
        };
        let cell = doc
            .select(&rows)
            .nth(row)
            .map(|tr| nth_text(tr, SUMMARY_CELLS, SUMMARY_VALUE_COLUMN))
            .unwrap_or_default();
        or_zero(cell)
    };

    SummaryStats {
        citations: parse_count(&value_at(0)),
        h_index: parse_count(&value_at(1)),
        i10_index: parse_count(&value_at(2)),
    }
}

pub fn parse_listing(html: &str) -> ListingPage {
    let doc = Html::parse_document(html);
    let rows = match selector(LISTING_ROWS) {
        Some(sel) => doc.select(&sel).map(row_fields).collect(),
        None => Vec::new(),
    };
    let more_available = selector(MORE_BUTTON)
        .and_then(|sel| doc.select(&sel).next())
        .map(|button| button.value().attr("disabled").is_none());

    ListingPage {
        rows,
        more_available,
    }
}

fn row_fields(row: ElementRef<'_>) -> RowFields {
    RowFields {
        title: nth_text(row, ROW_TITLE, 0),
        href: first_attr(row, ROW_TITLE, "href"),
        authors: nth_text(row, ROW_GRAY, 0),
        venue: nth_text(row, ROW_GRAY, 1),
        year: nth_text(row, ROW_YEAR, 0),
        cited_by: or_zero(nth_text(row, ROW_CITED_BY, 0)),
    }
}

/// Detail links on the listing are host-relative.
pub fn resolve_link(base_url: &str, href: &str) -> String {
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(base_url)
        .ok()
        .and_then(|base| base.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| format!("{}{}", base_url.trim_end_matches('/'), href))
}

/// Rows without a title are dropped.
pub fn row_to_record(row: RowFields, base_url: &str) -> Option<PublicationRecord> {
    if row.title.is_empty() {
        return None;
    }
    Some(PublicationRecord {
        source_link: resolve_link(base_url, &row.href),
        year: parse_year(&row.year),
        cited_by_count: parse_count(&row.cited_by),
        title: row.title,
        authors: row.authors,
        venue: row.venue,
    })
}
