//! Per-dispatch context, scoped to the task handling one request via
//! `tokio::task_local!` rather than a process-global `static`.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub same_site: Option<SameSite>,
    pub secure: bool,
    pub http_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SetCookie {
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(same_site) = self.same_site {
            let value = match same_site {
                SameSite::Strict => "Strict",
                SameSite::Lax => "Lax",
                SameSite::None => "None",
            };
            out.push_str(&format!("; SameSite={value}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Dynamic, request-scoped state a servant's dispatch may read or append
/// to: incoming cookies and outgoing `Set-Cookie` entries. Populated by
/// the transport driver immediately before invoking dispatch and dropped
/// on return — never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub cookies: HashMap<String, String>,
    pub set_cookies: Vec<SetCookie>,
}

impl SessionContext {
    /// `name=value; name2=value2` split on `;` with trimmed whitespace,
    /// per RFC 6265's informal `Cookie` header syntax.
    pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
        header
            .split(';')
            .filter_map(|part| {
                let part = part.trim();
                let (name, value) = part.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

tokio::task_local! {
    pub static SESSION_CONTEXT: std::cell::RefCell<SessionContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cookie_header_splits_and_trims() {
        let cookies = SessionContext::parse_cookie_header("a=1; b=2 ;c = 3");
        assert_eq!(cookies.get("a"), Some(&"1".to_string()));
        assert_eq!(cookies.get("b"), Some(&"2".to_string()));
        assert_eq!(cookies.get("c"), Some(&"3".to_string()));
    }

    #[test]
    fn set_cookie_header_value_includes_all_attributes() {
        let cookie = SetCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            path: Some("/".to_string()),
            domain: Some("example.com".to_string()),
            max_age: Some(3600),
            same_site: Some(SameSite::Lax),
            secure: true,
            http_only: true,
        };
        assert_eq!(
            cookie.to_header_value(),
            "sid=abc; Path=/; Domain=example.com; Max-Age=3600; SameSite=Lax; Secure; HttpOnly"
        );
    }

    #[tokio::test]
    async fn session_context_is_scoped_to_the_task() {
        let context = std::cell::RefCell::new(SessionContext::default());
        SESSION_CONTEXT
            .scope(context, async {
                SESSION_CONTEXT.with(|ctx| {
                    ctx.borrow_mut().cookies.insert("a".to_string(), "1".to_string());
                });
                SESSION_CONTEXT.with(|ctx| {
                    assert_eq!(ctx.borrow().cookies.get("a"), Some(&"1".to_string()));
                });
            })
            .await;
    }
}
