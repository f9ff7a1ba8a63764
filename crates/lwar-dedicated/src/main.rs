// main.rs — dedicated server binary
//
// A thin timer around the server core: bind, then tick on a millisecond
// clock until interrupted.

use std::thread;
use std::time::{Duration, Instant};

use lwar_server::{Server, SERVER_PORT};

const FRAME: Duration = Duration::from_millis(2);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = std::env::args()
        .nth(1)
        .map(|a| a.parse().unwrap_or_else(|_| {
            eprintln!("usage: lwar-dedicated [port]");
            std::process::exit(2);
        }))
        .unwrap_or(SERVER_PORT);

    let mut server = match Server::init(port) {
        Ok(s) => s,
        Err(e) => {
            log::error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let start = Instant::now();
    loop {
        let now = start.elapsed().as_millis() as u64;
        if !server.tick(now, false) {
            break;
        }
        thread::sleep(FRAME);
    }
    server.shutdown();
}
