//! Server-rendered HTML pages
//!
//! The few pages the service renders itself: the gateway hand-off form and
//! the two gateway return pages. Templates are embedded at build time and
//! rendered with HTML auto-escaping, so gateway- and shopper-supplied values
//! never reach the markup raw.

use minijinja::Environment;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

pub const PAYMENT_REDIRECT: &str = "payment_redirect.html";
pub const PAYMENT_CONFIRMED: &str = "payment_confirmed.html";
pub const PAYMENT_FAILED: &str = "payment_failed.html";

mod embedded {
    pub const PAYMENT_REDIRECT: &str = include_str!("../templates/payment_redirect.html");
    pub const PAYMENT_CONFIRMED: &str = include_str!("../templates/payment_confirmed.html");
    pub const PAYMENT_FAILED: &str = include_str!("../templates/payment_failed.html");
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("page templates failed to load: {0}")]
    Load(String),
    #[error("rendering {name} failed: {reason}")]
    Render { name: &'static str, reason: String },
}

static ENGINE: OnceLock<Result<Environment<'static>, PageError>> = OnceLock::new();

// `.html` names switch on minijinja's HTML auto-escaping.
fn init_engine() -> Result<Environment<'static>, PageError> {
    let mut env = Environment::new();
    for (name, source) in [
        (PAYMENT_REDIRECT, embedded::PAYMENT_REDIRECT),
        (PAYMENT_CONFIRMED, embedded::PAYMENT_CONFIRMED),
        (PAYMENT_FAILED, embedded::PAYMENT_FAILED),
    ] {
        env.add_template(name, source).map_err(|e| PageError::Load(format!("{name}: {e}")))?;
    }
    Ok(env)
}

fn engine() -> Result<&'static Environment<'static>, PageError> {
    ENGINE.get_or_init(init_engine).as_ref().map_err(Clone::clone)
}

/// Renders one of the embedded pages with `ctx`.
pub fn render<S: Serialize>(name: &'static str, ctx: S) -> Result<String, PageError> {
    let render_error = |e: minijinja::Error| PageError::Render { name, reason: e.to_string() };
    engine()?.get_template(name).map_err(render_error)?.render(ctx).map_err(render_error)
}

/// Page shown when a gateway return could not be confirmed.
pub fn payment_failed(message: &str) -> Result<String, PageError> {
    render(PAYMENT_FAILED, minijinja::context! { message => message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_pages_load() {
        for name in [PAYMENT_REDIRECT, PAYMENT_CONFIRMED, PAYMENT_FAILED] {
            assert!(engine().unwrap().get_template(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_failed_page_escapes_message() {
        let html = payment_failed("<script>alert('x')</script> & more").unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#x27;x&#x27;)"));
        assert!(html.contains("&amp; more"));
        assert!(html.contains(r#"href="/cart""#));
    }

    #[test]
    fn test_unknown_page_is_an_error() {
        assert!(matches!(render("missing.html", ()), Err(PageError::Render { .. })));
    }
}
