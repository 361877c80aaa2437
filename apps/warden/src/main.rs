//! warden binary

#[tokio::main]
async fn main() {
    warden::cli::run().await;
}
