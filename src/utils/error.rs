const MAX_LOG_ERROR_LEN: usize = 260;

/// Render an error for a single log line.
///
/// The failure modes this monitor actually produces are noisy: RPC decode
/// errors embed the entire response body after a `text:` marker, reqwest
/// errors append `for url (...)` with the full endpoint path (which can
/// carry provider API keys), and anyhow chains drag backtraces along.
/// All of that is elided before the line is width-capped.
pub fn compact_error(err: impl std::fmt::Display) -> String {
    let raw = err.to_string();
    let head = raw.split("Stack backtrace:").next().unwrap_or_default();

    let mut flat = String::with_capacity(head.len().min(MAX_LOG_ERROR_LEN + 32));
    for token in head.split_whitespace() {
        if !flat.is_empty() {
            flat.push(' ');
        }
        flat.push_str(token);
        if flat.len() > MAX_LOG_ERROR_LEN + 64 {
            break;
        }
    }

    if let Some((prefix, _)) = flat.split_once(" text: ") {
        flat = format!("{prefix} text=<omitted>");
    }
    elide_url_path(&mut flat);

    if flat.len() > MAX_LOG_ERROR_LEN {
        let mut cut = MAX_LOG_ERROR_LEN;
        while !flat.is_char_boundary(cut) {
            cut -= 1;
        }
        flat.truncate(cut);
        flat.push_str("...(truncated)");
    }
    flat
}

/// Reduce a `for url (scheme://host/path?query)` fragment to its host. The
/// endpoint identity is the useful part; paths and query strings are not.
fn elide_url_path(message: &mut String) {
    const MARKER: &str = "for url (";
    let Some(start) = message.find(MARKER) else {
        return;
    };
    let inner_start = start + MARKER.len();
    let Some(rel_end) = message[inner_start..].find(')') else {
        return;
    };
    let url = &message[inner_start..inner_start + rel_end];
    let host_end = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|after| url[after..].find('/').map(|slash| after + slash))
        .unwrap_or(url.len());
    let replacement = format!("{MARKER}{})", &url[..host_end]);
    message.replace_range(start..inner_start + rel_end + 1, &replacement);
}

#[cfg(test)]
mod tests {
    use super::compact_error;

    #[test]
    fn test_compact_error_elides_rpc_payload_and_backtrace() {
        let raw = "DeserError { err: unknown variant `0x7e`, text: \"{...huge block body...}\" }\nStack backtrace:\n 0: frame";
        let compact = compact_error(raw);
        assert!(compact.contains("text=<omitted>"));
        assert!(!compact.contains("Stack backtrace"));
        assert!(!compact.contains('\n'));
    }

    #[test]
    fn test_compact_error_strips_endpoint_path_and_query() {
        let raw = "error sending request for url (https://rpc.ankr.com/eth/abc123secret?block=0x64): connection reset";
        let compact = compact_error(raw);
        assert!(compact.contains("for url (https://rpc.ankr.com)"));
        assert!(!compact.contains("abc123secret"));
        assert!(compact.ends_with("connection reset"));
    }

    #[test]
    fn test_compact_error_keeps_bare_hosts_intact() {
        let raw = "request failed for url (https://eth.llamarpc.com): timed out";
        let compact = compact_error(raw);
        assert!(compact.contains("for url (https://eth.llamarpc.com)"));
    }

    #[test]
    fn test_compact_error_truncates_long_lines() {
        let raw = "x".repeat(1_000);
        let compact = compact_error(raw);
        assert!(compact.len() <= 260 + "...(truncated)".len());
        assert!(compact.ends_with("...(truncated)"));
    }
}
