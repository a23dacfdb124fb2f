use std::io::BufRead;
use std::thread;

use crossbeam_channel::{unbounded, Receiver};
use flowtrail_engine::OperatorSignal;
use log::{info, warn};

use crate::errors::Result;

/// Forwards operator commands typed on stdin (`q`, `n`, `r`) to the run loop.
pub fn spawn_stdin_reader() -> Result<Receiver<OperatorSignal>> {
    info!("Interactive control: q = quit, n = reinitialize, r = reset");
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
}

/// Reads lines on a helper thread until EOF, the receiver hanging up, or a
/// quit command.
pub fn spawn_line_reader<R>(reader: R) -> Result<Receiver<OperatorSignal>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match OperatorSignal::from_key(&line) {
                    Some(signal) => {
                        if tx.send(signal).is_err() || signal == OperatorSignal::Quit {
                            break;
                        }
                    }
                    None => warn!("Ignoring unknown command {:?}", line.trim()),
                }
            }
        })?;
    Ok(rx)
}
