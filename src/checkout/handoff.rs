//! Redirect hand-off to an external payment page.
//!
//! Once the form built here is submitted the shopper's browser leaves the
//! storefront. There is no way back into the same checkout session; the
//! return route resumes from the `orderId` alone.

use reqwest::Url;

use crate::api::wire::PaymentInitiation;
use crate::domain::aggregates::order::PaymentMethod;
use crate::domain::value_objects::OrderId;
use crate::pages::{self, PageError};
use crate::CheckoutError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentHandoff {
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub payment_url: Url,
    pub form_fields: Vec<(String, String)>,
}

impl PaymentHandoff {
    pub fn new(order_id: OrderId, method: PaymentMethod, initiation: PaymentInitiation) -> Result<Self, CheckoutError> {
        let payment_url = Url::parse(&initiation.payment_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "https" | "http"))
            .ok_or_else(|| CheckoutError::Payment { cause: "The payment provider returned an invalid payment page".to_string() })?;
        let form_fields = initiation
            .form_data
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect();
        Ok(Self { order_id, method, payment_url, form_fields })
    }

    /// A page that posts the hidden fields to the provider as soon as it loads.
    pub fn auto_submit_form(&self) -> Result<String, PageError> {
        pages::render(
            pages::PAYMENT_REDIRECT,
            minijinja::context! {
                action => self.payment_url.as_str(),
                fields => &self.form_fields,
                method => self.method.to_string()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn initiation(url: &str) -> PaymentInitiation {
        let mut form_data = BTreeMap::new();
        form_data.insert("amount".to_string(), json!(5750));
        form_data.insert("signature".to_string(), json!("a\"b<c>"));
        form_data.insert("transaction_uuid".to_string(), json!("ord_1-1700000000"));
        PaymentInitiation { payment_url: url.to_string(), form_data }
    }

    #[test]
    fn test_form_fields_are_stringified() {
        let handoff = PaymentHandoff::new(OrderId::new("ord_1"), PaymentMethod::Esewa, initiation("https://rc-epay.esewa.com.np/api/epay/main/v2/form")).unwrap();
        assert_eq!(handoff.form_fields[0], ("amount".to_string(), "5750".to_string()));
        assert_eq!(handoff.payment_url.host_str(), Some("rc-epay.esewa.com.np"));
    }

    #[test]
    fn test_auto_submit_form_escapes_values() {
        let handoff = PaymentHandoff::new(OrderId::new("ord_1"), PaymentMethod::Esewa, initiation("https://pay.example.com/form?a=1&b=2")).unwrap();
        let html = handoff.auto_submit_form().unwrap();
        assert!(html.contains("pay.example.com&#x2f;form?a=1&amp;b=2\""));
        assert!(html.contains(r#"name="signature" value="a&quot;b&lt;c&gt;""#));
        assert!(html.contains(r#"name="amount" value="5750""#));
        assert!(html.contains("document.forms[0].submit()"));
        assert!(!html.contains("<c>"));
    }

    #[test]
    fn test_auto_submit_form_cannot_break_out_of_attributes() {
        let mut form_data = BTreeMap::new();
        form_data.insert("x\"><script>".to_string(), json!("\"><img src=x onerror=alert(1)>"));
        let initiation = PaymentInitiation { payment_url: "https://pay.example.com/?q=\"><b>".to_string(), form_data };
        let handoff = PaymentHandoff::new(OrderId::new("ord_2"), PaymentMethod::Khalti, initiation).unwrap();

        let html = handoff.auto_submit_form().unwrap();

        assert!(!html.contains("<script>"));
        assert!(!html.contains("<img"));
        assert!(!html.contains("<b>"));
        assert_eq!(html.matches("<input").count(), 1);
    }

    #[test]
    fn test_rejects_non_http_payment_url() {
        for url in ["javascript:alert(1)", "not a url"] {
            let result = PaymentHandoff::new(OrderId::new("ord_1"), PaymentMethod::Khalti, initiation(url));
            assert!(matches!(result, Err(CheckoutError::Payment { .. })), "{url}");
        }
    }
}
