/// Split `text` into a command name and its arguments.
///
/// Returns `None` when the prefix is missing or nothing follows it.
pub fn parse_command(prefix: &str, text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace().map(str::to_owned);
    let name = tokens.next()?;
    Some((name, tokens.collect()))
}

/// The argument text after the command name, whitespace kept.
pub(crate) fn raw_args<'a>(prefix: &str, text: &'a str) -> &'a str {
    let Some(rest) = text.strip_prefix(prefix) else {
        return "";
    };
    let rest = rest.trim_start();
    match rest.find(char::is_whitespace) {
        Some(end) => rest[end..].trim_start(),
        None => "",
    }
}
