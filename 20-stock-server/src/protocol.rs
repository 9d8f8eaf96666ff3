//! Request line parsing.
//!
//! Requests are whitespace-separated text: a command word followed by up to
//! two integers. Parsing is permissive on purpose: a missing argument is 0,
//! and an argument is read the way `%d` reads it (optional sign, leading
//! digits, anything after is ignored). A token with no leading digits reads
//! as 0 and ends argument scanning, so later arguments also stay 0.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Show,
    Buy { id: i64, quantity: i64 },
    Sell { id: i64, quantity: i64 },
    /// Anything else; answered by echoing the line back.
    Unknown,
}

impl Request {
    pub fn parse(line: &str) -> Self {
        let mut tokens = line.split_ascii_whitespace();
        let command = tokens.next().unwrap_or("");

        let mut args = [0i64; 2];
        for slot in args.iter_mut() {
            match tokens.next().and_then(scan_int) {
                Some(value) => *slot = value,
                None => break,
            }
        }
        let [id, quantity] = args;

        match command {
            "show" => Request::Show,
            "buy" => Request::Buy { id, quantity },
            "sell" => Request::Sell { id, quantity },
            _ => Request::Unknown,
        }
    }
}

/// Reads a leading, optionally signed, decimal integer from `token`.
///
/// Returns `None` when the token does not start with a number or the value
/// does not fit in an `i64`.
fn scan_int(token: &str) -> Option<i64> {
    let bytes = token.as_bytes();
    let sign_len = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let digits = bytes[sign_len..]
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    token[..sign_len + digits].parse().ok()
}
