use parking_lot::Mutex;
use schoold::config::{Config, LogFormat};
use schoold::db::PoolOptions;
use schoold::ipc;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn write_line(stdout: &Mutex<io::Stdout>, line: &str) {
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", line);
    let _ = out.flush();
}

fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let state = ipc::AppState::new(config.clone());
    if let Some(path) = config.workspace.as_deref() {
        match ipc::Workspace::open(path, PoolOptions::from(&config)) {
            Ok(ws) => {
                state.replace_workspace(ws);
                tracing::info!(workspace = %path.to_string_lossy(), "workspace opened at startup");
            }
            Err(e) => tracing::error!(error = ?e, "failed to open startup workspace"),
        }
    }

    let stdout = Mutex::new(io::stdout());
    let stdin = io::stdin();

    // One worker per request; responses are matched up by id.
    std::thread::scope(|scope| {
        let state = &state;
        let stdout = &stdout;
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(v) => v,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            let req: ipc::Request = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    // Can't reply without id.
                    let resp = serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    });
                    write_line(stdout, &resp.to_string());
                    continue;
                }
            };

            scope.spawn(move || {
                let resp = ipc::handle_request(state, req);
                let line = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
                write_line(stdout, &line);
            });
        }
    });
}
