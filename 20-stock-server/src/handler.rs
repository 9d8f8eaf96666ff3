//! Executes parsed requests against the ledger and renders the response.

use tracing::debug;

use crate::{
    ledger::{Ledger, LedgerError},
    protocol::Request,
    snapshot,
};

pub const BUY_SUCCESS: &str = "[buy] success\n";
pub const SELL_SUCCESS: &str = "[sell] success\n";
pub const NOT_ENOUGH_STOCK: &str = "Not enough left stock\n";

/// Handles one raw request line and returns the bytes to send back.
///
/// `line` is exactly what was received, including the trailing newline if
/// there was one; unrecognised commands are answered with it verbatim.
pub fn handle_line(ledger: &mut Ledger, line: &[u8], max_response_bytes: usize) -> Vec<u8> {
    let text = String::from_utf8_lossy(line);
    let request = Request::parse(&text);
    debug!(?request, "handling request");

    let response = match request {
        Request::Show => show(ledger, max_response_bytes),
        Request::Buy { id, quantity } => match ledger.buy(id, quantity) {
            Ok(_) => BUY_SUCCESS.to_string(),
            Err(LedgerError::InsufficientStock { .. }) => NOT_ENOUGH_STOCK.to_string(),
            Err(err) => error_line("buy", &err),
        },
        Request::Sell { id, quantity } => match ledger.sell(id, quantity) {
            Ok(_) => SELL_SUCCESS.to_string(),
            Err(err) => error_line("sell", &err),
        },
        Request::Unknown => return line.to_vec(),
    };
    response.into_bytes()
}

/// Lists every record in ascending id order. A listing larger than
/// `max_response_bytes` is refused rather than cut short.
fn show(ledger: &Ledger, max_response_bytes: usize) -> String {
    let mut out = String::new();
    for record in ledger.iter() {
        snapshot::push_record(&mut out, record);
        if out.len() > max_response_bytes {
            return format!("[show] listing exceeds {max_response_bytes} bytes\n");
        }
    }
    if out.is_empty() {
        out.push('\n');
    }
    out
}

fn error_line(command: &str, err: &LedgerError) -> String {
    format!("[{command}] {err}\n")
}
