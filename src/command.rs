//! Splits a command line into a verb and argument, and parses the arguments
//! of the verbs whose grammar this engine cares about (`HELO`/`EHLO`,
//! `MAIL FROM`, `RCPT TO`, `AUTH`).
//!
//! Kept as hand-written parsers in the style of the teacher's
//! `extract_email`, rather than reaching for a regex engine the teacher
//! never depended on — the grammar here is small enough that a regex buys
//! nothing but a new dependency.

use std::collections::HashMap;

/// The recognized SMTP verbs this engine dispatches on. Anything else is
/// `Unknown`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Vrfy,
    Quit,
    Auth,
    StartTls,
    /// `SEND`/`SOML`/`SAML`/`EXPN`/`HELP`/`TURN`: recognized but unsupported.
    NotImplemented,
    /// The line was empty (just CRLF).
    Empty,
    Unknown,
}

/// A command line split into its verb and the remainder of the line.
pub(crate) struct CommandLine {
    pub verb: Verb,
    pub arg: String,
}

/// Splits `line` (already stripped of its trailing CRLF) into a verb and
/// argument. The argument is the remainder of the line after the first run
/// of whitespace, or empty if there is none.
pub(crate) fn parse_command_line(line: &str) -> CommandLine {
    if line.is_empty() {
        return CommandLine {
            verb: Verb::Empty,
            arg: String::new(),
        };
    }

    let (verb_token, arg) = match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx + 1..].trim_start().to_string()),
        None => (line, String::new()),
    };

    let verb = match verb_token.to_ascii_uppercase().as_str() {
        "HELO" => Verb::Helo,
        "EHLO" => Verb::Ehlo,
        "MAIL" => Verb::Mail,
        "RCPT" => Verb::Rcpt,
        "DATA" => Verb::Data,
        "RSET" => Verb::Rset,
        "NOOP" => Verb::Noop,
        "VRFY" => Verb::Vrfy,
        "QUIT" => Verb::Quit,
        "AUTH" => Verb::Auth,
        "STARTTLS" => Verb::StartTls,
        "SEND" | "SOML" | "SAML" | "EXPN" | "HELP" | "TURN" => Verb::NotImplemented,
        _ => Verb::Unknown,
    };

    CommandLine { verb, arg }
}

/// Parses the single-token domain argument of `HELO`/`EHLO`. `None` means a
/// `501`.
pub(crate) fn parse_domain_arg(arg: &str) -> Option<String> {
    let domain = arg.split_whitespace().next()?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_string())
    }
}

/// A parsed `MAIL FROM:<addr> PARAM=value ...` argument.
pub(crate) struct MailFrom {
    pub address: String,
    pub params: HashMap<String, String>,
}

/// Parses the argument of `MAIL`. `None` means a `501`.
pub(crate) fn parse_mail_from(arg: &str) -> Option<MailFrom> {
    let rest = strip_ci_prefix(arg.trim(), "FROM:")?;
    let rest = rest.trim_start();

    let (address, remainder) = if let Some(after_bracket) = rest.strip_prefix('<') {
        let end = after_bracket.find('>')?;
        (
            after_bracket[..end].to_string(),
            after_bracket[end + 1..].trim_start(),
        )
    } else {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let address = parts.next().unwrap_or("").to_string();
        (address, parts.next().unwrap_or("").trim_start())
    };

    if address.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    for token in remainder.split_whitespace() {
        let mut kv = token.splitn(2, '=');
        let key = kv.next()?.to_ascii_uppercase();
        let value = kv.next().unwrap_or("").to_string();
        if key == "SIZE" && value.parse::<u32>().is_err() {
            return None;
        }
        params.insert(key, value);
    }

    Some(MailFrom { address, params })
}

/// Parses the argument of `RCPT`. `None` means a `501`.
///
/// This intentionally keeps the teacher corpus's lenient trim: the
/// remainder after `TO:` is trimmed of `<`, `>` and spaces from both ends,
/// which accepts malformed input like `TO: alice@example.com` without angle
/// brackets. See the crate's design notes for why this is preserved rather
/// than tightened.
pub(crate) fn parse_rcpt_to(arg: &str) -> Option<String> {
    if arg.len() < 3 || !arg[..3].eq_ignore_ascii_case("TO:") {
        return None;
    }
    let trimmed = arg[3..].trim_matches(|c| c == '<' || c == '>' || c == ' ');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses the argument of `AUTH`: a mechanism token, and an optional
/// (still base64-encoded) initial response token.
pub(crate) fn parse_auth_arg(arg: &str) -> Option<(String, Option<String>)> {
    let mut tokens = arg.split_whitespace();
    let mechanism = tokens.next()?.to_ascii_uppercase();
    let initial_response = tokens.next().map(str::to_string);
    Some((mechanism, initial_response))
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
