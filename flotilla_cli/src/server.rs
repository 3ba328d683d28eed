use flotilla_core::liveness::LivenessSweep;
use flotilla_core::orchestrator::Orchestrator;
use flotilla_core::protocol::handle_line;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Answers every non-blank request line with exactly one response line.
/// Returns the number of requests handled once the reader is exhausted.
pub fn serve_lines<R: BufRead, W: Write>(
    orchestrator: &Orchestrator,
    reader: R,
    mut writer: W,
) -> io::Result<usize> {
    let mut handled = 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(orchestrator, line);
        writeln!(writer, "{}", response.to_line())?;
        writer.flush()?;
        handled += 1;
    }
    Ok(handled)
}

pub fn serve_stdio(orchestrator: &Orchestrator) -> Result<(), anyhow::Error> {
    info!("serving requests on stdin");
    let stdin = io::stdin();
    let stdout = io::stdout();
    let handled = serve_lines(orchestrator, stdin.lock(), stdout.lock())?;
    info!(handled, "stdin closed, shutting down");
    Ok(())
}

/// Accepts connections forever, one thread per connection. All connections
/// share the same orchestrator.
pub fn serve_tcp(orchestrator: Arc<Orchestrator>, listen: &str) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(listen)
        .map_err(|e| anyhow::anyhow!("Failed to bind control listener on {}: {}", listen, e))?;
    info!(addr = %listener.local_addr()?, "serving requests over tcp");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let orchestrator = Arc::clone(&orchestrator);
                thread::spawn(move || handle_connection(&orchestrator, stream));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    Ok(())
}

fn handle_connection(orchestrator: &Orchestrator, stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(%peer, "connection opened");

    let reader = match stream.try_clone() {
        Ok(read_half) => BufReader::new(read_half),
        Err(e) => {
            warn!(%peer, error = %e, "failed to split connection");
            return;
        }
    };
    match serve_lines(orchestrator, reader, stream) {
        Ok(handled) => debug!(%peer, handled, "connection closed"),
        Err(e) => warn!(%peer, error = %e, "connection dropped"),
    }
}

/// Runs `sweep` against the orchestrator's registry every `interval` on a
/// background thread.
pub fn spawn_liveness(
    orchestrator: Arc<Orchestrator>,
    sweep: LivenessSweep,
    interval: Duration,
) -> JoinHandle<()> {
    info!(
        grace_secs = sweep.grace().num_seconds(),
        interval_secs = interval.as_secs(),
        "liveness sweep enabled"
    );
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            let stale = sweep.sweep_now(orchestrator.registry());
            if !stale.is_empty() {
                debug!(count = stale.len(), "liveness sweep disconnected agents");
            }
        }
    })
}
