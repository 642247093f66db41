//! Filename templates.
//!
//! A template is literal text with `{name}` or `{name:format}` placeholders, e.g.,
//! `AVHR_xxx_1B_{platform_short_name}_{start_time:%Y%m%d%H%M%SZ}_{end_time:%Y%m%d%H%M%SZ}_*`.
//! `*` and `?` outside of placeholders are shell style wildcards.
//!
//! Supported formats are a width with a type, `Ns` for text and `Nd` for integers (`N`
//! optional, leading zeros ignored), or a `strftime` style time format using any of
//! `%Y %y %m %d %j %H %M %S %f`. Time fields are always fixed width.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::{Error, Result};

/// A value parsed from a filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Time(NaiveDateTime),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Time(t) => write!(f, "{t}"),
        }
    }
}

/// Metadata fields parsed from a filename.
pub type FilenameInfo = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone)]
enum FieldKind {
    Text,
    Int,
    Time(String),
}

#[derive(Debug, Clone)]
struct Placeholder {
    name: String,
    kind: FieldKind,
}

fn pattern_err(pattern: &str, reason: &str) -> Error {
    Error::Pattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

/// Width of the text produced by a time format.
fn time_width(template: &str, fmt: &str) -> Result<usize> {
    let mut width = 0;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            width += 1;
            continue;
        }
        width += match chars.next() {
            Some('Y') => 4,
            Some('y' | 'm' | 'd' | 'H' | 'M' | 'S') => 2,
            Some('j') => 3,
            Some('f') => 6,
            Some('%') => 1,
            Some(other) => {
                return Err(pattern_err(
                    template,
                    &format!("unsupported time directive %{other}"),
                ))
            }
            None => return Err(pattern_err(template, "dangling %")),
        };
    }
    Ok(width)
}

/// Returns the regex and glob for a single placeholder.
fn placeholder(template: &str, name: &str, format_str: Option<&str>) -> Result<(Placeholder, String, String)> {
    let group = |body: &str| format!("(?P<{name}>{body})");
    let Some(format_str) = format_str else {
        return Ok((
            Placeholder {
                name: name.to_string(),
                kind: FieldKind::Text,
            },
            group(".*?"),
            "*".to_string(),
        ));
    };
    if format_str.contains('%') {
        let width = time_width(template, format_str)?;
        return Ok((
            Placeholder {
                name: name.to_string(),
                kind: FieldKind::Time(format_str.to_string()),
            },
            group(&format!(".{{{width}}}")),
            "?".repeat(width),
        ));
    }

    let (digits, kind) = match format_str.chars().last() {
        Some('s') => (&format_str[..format_str.len() - 1], FieldKind::Text),
        Some('d') => (&format_str[..format_str.len() - 1], FieldKind::Int),
        _ => return Err(pattern_err(template, &format!("unsupported format {format_str:?}"))),
    };
    let class = match kind {
        FieldKind::Int => r"[-+]?\d",
        _ => ".",
    };
    if digits.is_empty() {
        let body = format!("{class}{}", if matches!(kind, FieldKind::Int) { "+" } else { "*?" });
        return Ok((
            Placeholder {
                name: name.to_string(),
                kind,
            },
            group(&body),
            "*".to_string(),
        ));
    }
    let width: usize = digits
        .parse()
        .map_err(|_| pattern_err(template, &format!("invalid width {digits:?}")))?;
    let body = match kind {
        FieldKind::Int => format!(r"[-+ ]\d{{{}}}|\d{{{width}}}", width.saturating_sub(1)),
        _ => format!(".{{{width}}}"),
    };
    Ok((
        Placeholder {
            name: name.to_string(),
            kind,
        },
        group(&format!("(?:{body})")),
        "?".repeat(width),
    ))
}

/// A compiled filename template.
#[derive(Debug, Clone)]
pub struct FilePattern {
    template: String,
    glob: String,
    regex: Regex,
    fields: Vec<Placeholder>,
}

impl FilePattern {
    /// Compile `template`.
    ///
    /// # Errors
    /// [Error::Pattern] for unbalanced braces, unsupported formats or repeated field names.
    pub fn new(template: &str) -> Result<Self> {
        let mut re = String::from("^");
        let mut glob = String::new();
        let mut fields = Vec::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(pattern_err(template, "unbalanced '{'")),
                            Some(c) => body.push(c),
                        }
                    }
                    let (name, format_str) = match body.split_once(':') {
                        Some((name, format_str)) => (name, Some(format_str)),
                        None => (body.as_str(), None),
                    };
                    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(pattern_err(template, &format!("invalid field name {name:?}")));
                    }
                    let (field, field_re, field_glob) = placeholder(template, name, format_str)?;
                    re.push_str(&field_re);
                    glob.push_str(&field_glob);
                    fields.push(field);
                }
                '}' => return Err(pattern_err(template, "unbalanced '}'")),
                '*' => {
                    re.push_str(".*");
                    glob.push('*');
                }
                '?' => {
                    re.push('.');
                    glob.push('?');
                }
                c => {
                    re.push_str(&regex::escape(&c.to_string()));
                    glob.push(c);
                }
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|e| pattern_err(template, &e.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            glob,
            regex,
            fields,
        })
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Shell style glob equivalent of the template.
    #[must_use]
    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// True if the basename of `path` matches this template and its fields parse.
    pub fn matches<P: AsRef<Path>>(&self, path: P) -> bool {
        self.parse(path).is_ok()
    }

    /// Parse the fields from the basename of `path`.
    ///
    /// # Errors
    /// [Error::Pattern] if the name does not match or a field value does not parse.
    pub fn parse<P: AsRef<Path>>(&self, path: P) -> Result<FilenameInfo> {
        let name = basename(path.as_ref());
        let caps = self
            .regex
            .captures(name)
            .ok_or_else(|| pattern_err(&self.template, &format!("{name:?} does not match")))?;

        let mut info = FilenameInfo::new();
        for field in &self.fields {
            let Some(raw) = caps.name(&field.name).map(|m| m.as_str()) else {
                continue;
            };
            let value = match &field.kind {
                FieldKind::Text => FieldValue::Text(raw.to_string()),
                FieldKind::Int => FieldValue::Int(raw.trim().parse().map_err(|_| {
                    pattern_err(&self.template, &format!("{}={raw:?} is not an integer", field.name))
                })?),
                FieldKind::Time(fmt) => FieldValue::Time(parse_time(raw, fmt).ok_or_else(|| {
                    pattern_err(&self.template, &format!("{}={raw:?} is not a {fmt} time", field.name))
                })?),
            };
            info.insert(field.name.clone(), value);
        }
        Ok(info)
    }
}

impl Display for FilePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.template)
    }
}

fn parse_time(raw: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, fmt).ok().or_else(|| {
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Final component of `path` as a str, or "" if it has none or it is not UTF-8.
#[must_use]
pub fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
