use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Start logging and a mock service shared by every test of the binary.
#[allow(unused)]
pub fn init() -> SocketAddr {
    static MOCK: OnceLock<SocketAddr> = OnceLock::new();

    *MOCK.get_or_init(|| {
        let _ = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("volley=debug,mock_service=info")),
            )
            .with_test_writer()
            .try_init();

        // The service outlives any single test runtime.
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let addr = mock_service::spawn().await.unwrap();
                tx.send(addr).unwrap();
                std::future::pending::<()>().await
            });
        });
        rx.recv().unwrap()
    })
}

#[allow(unused)]
pub fn url(path: &str) -> String {
    format!("http://{}{path}", init())
}
