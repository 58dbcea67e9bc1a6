//! Conversion of snake_case field ids into external naming conventions.

use serde::{Deserialize, Serialize};

/// Naming convention of generated keys.
///
/// Each style combines a separator (`_`, `-`, none, `.`) with a case
/// (lower, camel, pascal, upper). The serialized form shows both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameStyle {
    #[serde(rename = "lower_snake")]
    LowerSnake,
    #[serde(rename = "camel_Snake")]
    CamelSnake,
    #[serde(rename = "Pascal_Snake")]
    PascalSnake,
    #[serde(rename = "UPPER_SNAKE")]
    UpperSnake,

    #[serde(rename = "lower-kebab")]
    LowerKebab,
    #[serde(rename = "camel-Kebab")]
    CamelKebab,
    #[serde(rename = "Pascal-Kebab")]
    PascalKebab,
    #[serde(rename = "UPPER-KEBAB")]
    UpperKebab,

    #[serde(rename = "lowercase")]
    Lower,
    #[serde(rename = "camelCase")]
    Camel,
    #[serde(rename = "PascalCase")]
    Pascal,
    #[serde(rename = "UPPERCASE")]
    Upper,

    #[serde(rename = "lower.dot")]
    LowerDot,
    #[serde(rename = "camel.Dot")]
    CamelDot,
    #[serde(rename = "Pascal.Dot")]
    PascalDot,
    #[serde(rename = "UPPER.DOT")]
    UpperDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    Lower,
    Title,
    Upper,
}

impl Case {
    fn apply(self, word: &str) -> String {
        match self {
            Case::Lower => word.to_lowercase(),
            Case::Upper => word.to_uppercase(),
            Case::Title => title(word),
        }
    }
}

/// Upper-cases every letter that follows a non-letter and lower-cases the rest.
fn title(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut after_letter = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if after_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            after_letter = true;
        } else {
            out.push(c);
            after_letter = false;
        }
    }
    out
}

struct Conversion {
    sep: &'static str,
    first: Case,
    other: Case,
}

impl NameStyle {
    pub const ALL: [NameStyle; 16] = [
        NameStyle::LowerSnake,
        NameStyle::CamelSnake,
        NameStyle::PascalSnake,
        NameStyle::UpperSnake,
        NameStyle::LowerKebab,
        NameStyle::CamelKebab,
        NameStyle::PascalKebab,
        NameStyle::UpperKebab,
        NameStyle::Lower,
        NameStyle::Camel,
        NameStyle::Pascal,
        NameStyle::Upper,
        NameStyle::LowerDot,
        NameStyle::CamelDot,
        NameStyle::PascalDot,
        NameStyle::UpperDot,
    ];

    fn conversion(self) -> Conversion {
        use NameStyle::*;
        let sep = match self {
            LowerSnake | CamelSnake | PascalSnake | UpperSnake => "_",
            LowerKebab | CamelKebab | PascalKebab | UpperKebab => "-",
            Lower | Camel | Pascal | Upper => "",
            LowerDot | CamelDot | PascalDot | UpperDot => ".",
        };
        let (first, other) = match self {
            LowerSnake | LowerKebab | Lower | LowerDot => (Case::Lower, Case::Lower),
            CamelSnake | CamelKebab | Camel | CamelDot => (Case::Lower, Case::Title),
            PascalSnake | PascalKebab | Pascal | PascalDot => (Case::Title, Case::Title),
            UpperSnake | UpperKebab | Upper | UpperDot => (Case::Upper, Case::Upper),
        };
        Conversion { sep, first, other }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameStyleError {
    #[error("cannot convert `{0}`: only word characters are allowed")]
    NotSnakeStyle(String),
    #[error("cannot convert `{0}`: it has no word between underscores")]
    NoWords(String),
}

pub fn is_snake_style(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Converts a snake_case id into `style`.
///
/// Leading and trailing underscores are kept as is; inner underscore runs
/// become one separator per underscore.
pub fn convert_snake_style(name: &str, style: NameStyle) -> Result<String, NameStyleError> {
    if !is_snake_style(name) {
        return Err(NameStyleError::NotSnakeStyle(name.to_owned()));
    }
    let body = name.trim_start_matches('_');
    let front = &name[..name.len() - body.len()];
    let core = body.trim_end_matches('_');
    let trailing = &body[core.len()..];
    if core.is_empty() {
        return Err(NameStyleError::NoWords(name.to_owned()));
    }

    let conv = style.conversion();
    let first_end = core.find('_').unwrap_or(core.len());
    let (raw_first, mut rest) = core.split_at(first_end);

    let mut out = String::with_capacity(name.len());
    out.push_str(front);
    out.push_str(&conv.first.apply(raw_first));
    while !rest.is_empty() {
        let underscores = rest.len() - rest.trim_start_matches('_').len();
        for _ in 0..underscores {
            out.push_str(conv.sep);
        }
        rest = &rest[underscores..];
        let word_end = rest.find('_').unwrap_or(rest.len());
        out.push_str(&conv.other.apply(&rest[..word_end]));
        rest = &rest[word_end..];
    }
    out.push_str(trailing);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(name: &str, style: NameStyle) -> String {
        convert_snake_style(name, style).unwrap()
    }

    #[test]
    fn styles_of_a_plain_id() {
        let expected = [
            (NameStyle::LowerSnake, "user_id_x"),
            (NameStyle::CamelSnake, "user_Id_X"),
            (NameStyle::PascalSnake, "User_Id_X"),
            (NameStyle::UpperSnake, "USER_ID_X"),
            (NameStyle::LowerKebab, "user-id-x"),
            (NameStyle::CamelKebab, "user-Id-X"),
            (NameStyle::PascalKebab, "User-Id-X"),
            (NameStyle::UpperKebab, "USER-ID-X"),
            (NameStyle::Lower, "useridx"),
            (NameStyle::Camel, "userIdX"),
            (NameStyle::Pascal, "UserIdX"),
            (NameStyle::Upper, "USERIDX"),
            (NameStyle::LowerDot, "user.id.x"),
            (NameStyle::CamelDot, "user.Id.X"),
            (NameStyle::PascalDot, "User.Id.X"),
            (NameStyle::UpperDot, "USER.ID.X"),
        ];
        for (style, want) in expected {
            assert_eq!(convert("user_id_x", style), want, "{style:?}");
        }
    }

    #[test]
    fn edge_underscores_survive() {
        assert_eq!(convert("_private", NameStyle::Camel), "_private");
        assert_eq!(convert("__dunder__", NameStyle::Upper), "__DUNDER__");
        assert_eq!(convert("class_", NameStyle::Pascal), "Class_");
        assert_eq!(convert("a__b", NameStyle::LowerKebab), "a--b");
    }

    #[test]
    fn title_restarts_after_digits() {
        assert_eq!(convert("x_abc1def", NameStyle::Camel), "xAbc1Def");
        assert_eq!(convert("HTTP_code", NameStyle::Camel), "httpCode");
    }

    #[test]
    fn rejects_non_snake_ids() {
        assert_eq!(
            convert_snake_style("a-b", NameStyle::Camel),
            Err(NameStyleError::NotSnakeStyle("a-b".into()))
        );
        assert_eq!(
            convert_snake_style("__", NameStyle::Camel),
            Err(NameStyleError::NoWords("__".into()))
        );
        assert!(convert_snake_style("", NameStyle::Camel).is_err());
    }

    #[test]
    fn serde_names_show_the_style() {
        let names: Vec<String> = NameStyle::ALL
            .iter()
            .map(|style| serde_json::to_value(style).unwrap().as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names[1], "camel_Snake");
        assert_eq!(names[9], "camelCase");
        let parsed: NameStyle = serde_json::from_str("\"UPPER.DOT\"").unwrap();
        assert_eq!(parsed, NameStyle::UpperDot);
    }
}
