/// Makes an identifier safe to use as a single object key segment.
pub fn sanitize_id(id: &str) -> String {
    id.trim()
        .chars()
        .map(|c| match c {
            '~' | ',' | '|' | '.' | '/' | '[' | '{' | '}' | ']' | '=' | '&' | '%' | '$' | '\\'
            | '"' | '\'' | '`' | '<' | '>' | '?' | ':' | ';' | '*' | '+' | '#' => '_',
            c if c.is_whitespace() => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("Ada Lovelace"), "Ada_Lovelace");
        assert_eq!(sanitize_id(" no_answer "), "no_answer");
        assert_eq!(sanitize_id("call|456,"), "call_456_");
        assert_eq!(sanitize_id("path/to/id"), "path_to_id");
        assert_eq!(sanitize_id("id.with.dots"), "id_with_dots");
        assert_eq!(sanitize_id("+61412345678"), "_61412345678");
        assert_eq!(sanitize_id("safe-id_123"), "safe-id_123");
        assert_eq!(sanitize_id("more:;*#"), "more____");
    }
}
