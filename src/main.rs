#[tokio::main]
async fn main() {
    if let Err(e) = product_service::run_server().await {
        eprintln!("product-service failed: {e:#}");
        std::process::exit(1);
    }
}
