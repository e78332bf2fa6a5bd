mod app;

use std::io;

#[tokio::main]
async fn main() -> io::Result<()> {
    app::run().await
}
