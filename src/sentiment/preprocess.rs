//! Review text normalisation, applied identically at training and
//! prediction time.

/// Strip HTML tags, replacing each with a space.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
}

/// Decode the handful of entities that show up in scraped review text.
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Strip markup, lowercase, and keep only alphabetic characters and
/// whitespace.
pub fn preprocess(review: &str) -> String {
    decode_entities(&strip_html(review))
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_punctuation() {
        let raw = "Great film!<br /><br />Would watch <b>again</b>, 10/10.";
        let cleaned = preprocess(raw);
        let words: Vec<&str> = cleaned.split_whitespace().collect();
        assert_eq!(words, vec!["great", "film", "would", "watch", "again"]);
    }

    #[test]
    fn decodes_entities_before_filtering() {
        assert_eq!(preprocess("Tom &amp; Jerry"), "tom  jerry");
        assert_eq!(decode_entities("a&nbsp;b"), "a b");
    }

    #[test]
    fn stray_closing_bracket_is_kept_out() {
        assert_eq!(preprocess("a > b"), "a  b");
    }

    #[test]
    fn empty_input() {
        assert_eq!(preprocess(""), "");
    }
}
