//! Turn a chat message into plain note text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Channel mention, e.g. `<#1067205302946111602>`.
static CHANNEL_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<#[0-9]+>").unwrap());
/// User mention, `<@id>` or the legacy nickname form `<@!id>`.
static USER_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<@!?[0-9]+>").unwrap());
/// Role mention, `<@&id>`.
static ROLE_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<@&[0-9]+>").unwrap());

/// Escaped ampersand some clients leave in attachment URLs.
const ESCAPED_AMPERSAND: &str = "\\u0026";

/// Strip mention markers from `text` and append each attachment URL on its
/// own line, in the order given.
pub fn normalize<S: AsRef<str>>(text: &str, attachments: &[S]) -> String {
    let mut content = strip_mentions(text);
    for url in attachments {
        content.push('\n');
        content.push_str(&url.as_ref().replace(ESCAPED_AMPERSAND, "&"));
    }
    content
}

/// Remove channel, user and role mentions without leaving a placeholder.
pub fn strip_mentions(text: &str) -> String {
    let text = CHANNEL_MENTION.replace_all(text, "");
    let text = USER_MENTION.replace_all(&text, "");
    ROLE_MENTION.replace_all(&text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: &[&str] = &[];

    #[test]
    fn clean_text_passes_through() {
        let text = "just a message, with <angle> brackets & stuff";
        assert_eq!(normalize(text, NONE), text);
    }

    #[test]
    fn strips_all_mention_kinds() {
        assert_eq!(
            normalize("hello <@123456> and <#789> and <@&42>", NONE),
            "hello  and  and "
        );
        assert_eq!(normalize("hey <@!99>!", NONE), "hey !");
    }

    #[test]
    fn leaves_malformed_markers() {
        assert_eq!(strip_mentions("<@abc> <#> <@&>"), "<@abc> <#> <@&>");
    }

    #[test]
    fn appends_attachments_in_order() {
        let out = normalize(
            "pics <@1>",
            &["https://cdn.example/a.png", "https://cdn.example/b.png"],
        );
        assert_eq!(
            out,
            "pics \nhttps://cdn.example/a.png\nhttps://cdn.example/b.png"
        );
    }

    #[test]
    fn decodes_escaped_ampersand_in_urls() {
        let url = String::from(r"https://cdn.example/a.png?ex=1\u0026is=2\u0026hm=3");
        assert_eq!(
            normalize("", &[url]),
            "\nhttps://cdn.example/a.png?ex=1&is=2&hm=3"
        );
    }

    #[test]
    fn empty_text_with_no_attachments_is_empty() {
        assert_eq!(normalize("", NONE), "");
    }
}
