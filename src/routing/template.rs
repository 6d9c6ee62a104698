//! `{{placeholder}}` expansion for forward target fields.
//!
//! Supported placeholders: `{{subject}}`, `{{route_id}}`,
//! `{{headers.name}}` and payload paths (`{{payload.a.b}}`, or the short
//! form `{{a.b}}`). Missing values expand to the empty string.

use std::fmt;

use crate::event::Event;
use crate::expr::compile::FieldRef;
use crate::expr::eval::resolve_field;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Field(FieldRef),
    RouteId,
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| format!("unclosed placeholder in '{}'", source))?;
            let name = after[..close].trim();
            if name.is_empty() {
                return Err(format!("empty placeholder in '{}'", source));
            }
            let part = if name == "route_id" {
                Part::RouteId
            } else {
                let field = FieldRef::parse(name)
                    .map_err(|e| format!("bad placeholder '{{{{{}}}}}': {}", name, e))?;
                Part::Field(field)
            };
            parts.push(part);
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text(_)))
    }

    pub fn render(&self, event: &Event, route_id: &str) -> String {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::RouteId => out.push_str(route_id),
                Part::Field(field) => {
                    if let Some(value) = resolve_field(field, event) {
                        out.push_str(&value.render());
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_placeholders() {
        let event = Event::from_json("events.user.login", json!({"user_id": "u-7", "geo": {"cc": "DE"}}))
            .with_header("tenant", "acme");
        let t = Template::parse("users/{{payload.user_id}}/{{geo.cc}}?t={{headers.tenant}}&s={{subject}}&r={{ route_id }}").unwrap();
        assert_eq!(
            t.render(&event, "r1"),
            "users/u-7/DE?t=acme&s=events.user.login&r=r1"
        );
    }

    #[test]
    fn test_missing_and_numbers() {
        let event = Event::from_json("a", json!({"n": 42, "f": 1.5}));
        let t = Template::parse("{{n}}-{{f}}-{{missing}}").unwrap();
        assert_eq!(t.render(&event, "r"), "42-1.5-");
    }

    #[test]
    fn test_static_and_errors() {
        assert!(Template::parse("plain").unwrap().is_static());
        assert!(!Template::parse("{{subject}}").unwrap().is_static());
        assert!(Template::parse("x{{payload.a").is_err());
        assert!(Template::parse("{{ }}").is_err());
        assert!(Template::parse("{{payload..a}}").is_err());
    }
}
