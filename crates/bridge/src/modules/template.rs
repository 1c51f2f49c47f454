//! Textual `{{.name}}` placeholder substitution for command templates.
//!
//! Substitution is purely textual and only against declared placeholders;
//! unknown references are caught at registration time by
//! [`placeholders`], never at call time.

use std::collections::HashMap;

/// A malformed or unknown placeholder reference.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum TemplateError {
    /// `{{` without a matching `}}`.
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
    /// Placeholder did not match the `{{.identifier}}` shape.
    #[error("malformed placeholder {0:?}")]
    Malformed(String),
    /// Placeholder names an argument that does not exist.
    #[error("placeholder {0:?} does not name a declared argument")]
    Unknown(String),
}

/// Extracts every placeholder name referenced by `template`.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names = Vec::new();
    let mut rest = template;
    let mut offset = 0usize;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Unterminated(offset + start));
        };
        let inner = &after[..end];
        let name = parse_placeholder(inner)?;
        if !names.contains(&name) {
            names.push(name);
        }
        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    Ok(names)
}

fn parse_placeholder(inner: &str) -> Result<String, TemplateError> {
    let trimmed = inner.trim();
    let Some(name) = trimmed.strip_prefix('.') else {
        return Err(TemplateError::Malformed(format!("{{{{{inner}}}}}")));
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(TemplateError::Malformed(format!("{{{{{inner}}}}}")));
    }
    Ok(name.to_owned())
}

/// Substitutes every placeholder with its bound value.
///
/// Callers validate the template against the declared arguments first, so
/// a missing binding here is an internal inconsistency, reported as
/// [`TemplateError::Unknown`].
pub fn substitute(
    template: &str,
    bindings: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Unterminated(start));
        };
        let name = parse_placeholder(&after[..end])?;
        let value = bindings
            .get(&name)
            .ok_or_else(|| TemplateError::Unknown(name.clone()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn extracts_each_placeholder_once() {
        let names = placeholders("df -h {{.path}} && ls {{.path}} {{.flags}}").expect("parses");
        assert_eq!(names, ["path", "flags"]);
    }

    #[test]
    fn template_without_placeholders_is_empty() {
        assert_eq!(placeholders("uptime").expect("parses"), Vec::<String>::new());
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let err = placeholders("echo {{.path").unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated(_)));
    }

    #[test]
    fn placeholder_without_dot_is_malformed() {
        let err = placeholders("echo {{path}}").unwrap_err();
        assert!(matches!(err, TemplateError::Malformed(_)));
    }

    #[test]
    fn substitution_is_textual() {
        let rendered = substitute(
            "df -h {{.path}}",
            &bindings(&[("path", "/home")]),
        )
        .expect("substitutes");
        assert_eq!(rendered, "df -h /home");
    }

    #[test]
    fn repeated_placeholders_substitute_everywhere() {
        let rendered = substitute(
            "cp {{.src}} {{.src}}.bak",
            &bindings(&[("src", "/etc/hosts")]),
        )
        .expect("substitutes");
        assert_eq!(rendered, "cp /etc/hosts /etc/hosts.bak");
    }

    #[test]
    fn unknown_binding_is_rejected() {
        let err = substitute("echo {{.nope}}", &bindings(&[])).unwrap_err();
        assert_eq!(err, TemplateError::Unknown("nope".to_owned()));
    }
}
