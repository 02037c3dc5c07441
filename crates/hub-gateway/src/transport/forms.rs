//! Protocol Forms for consumer-facing TDs.
//!
//! Agent-supplied Forms point at the agent's own endpoints and are replaced
//! with Forms naming the hub's HTTP routes, so a TD read from the directory
//! tells a consumer exactly how to reach each affordance through the hub.

use crate::router::TdDecorator;
use hub_types::{Form, ThingDescription};
use serde_json::json;

/// Security scheme name referenced by every decorated TD.
pub const SECURITY_SCHEME: &str = "bearer_sc";

/// SSE subprotocol hint on subscription Forms.
const SSE_SUBPROTOCOL: &str = "sse";

/// Injects the hub's Forms into TDs.
#[derive(Debug, Clone)]
pub struct FormsDecorator {
    base_url: String,
}

impl FormsDecorator {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn href(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn sse_form(&self, op: &str, path: &str) -> Form {
        Form::new(op, self.href(path), "POST").with_subprotocol(SSE_SUBPROTOCOL)
    }
}

impl TdDecorator for FormsDecorator {
    fn decorate(&self, td: &mut ThingDescription) {
        td.strip_forms();
        let id = td.id.clone();

        for (name, property) in td.properties.iter_mut() {
            let path = format!("/digitwin/properties/{id}/{name}");
            property.forms.push(Form::new("readproperty", self.href(&path), "GET"));
            if !property.is_read_only() {
                property
                    .forms
                    .push(Form::new("writeproperty", self.href(&path), "POST"));
            }
            property.forms.push(self.sse_form(
                "observeproperty",
                &format!("/ssesc/digitwin/observe/{id}/{name}"),
            ));
            property.forms.push(self.sse_form(
                "unobserveproperty",
                &format!("/ssesc/digitwin/unobserve/{id}/{name}"),
            ));
        }

        for (name, event) in td.events.iter_mut() {
            event.forms.push(self.sse_form(
                "subscribeevent",
                &format!("/ssesc/digitwin/subscribe/{id}/{name}"),
            ));
            event.forms.push(self.sse_form(
                "unsubscribeevent",
                &format!("/ssesc/digitwin/unsubscribe/{id}/{name}"),
            ));
        }

        for (name, action) in td.actions.iter_mut() {
            let path = format!("/digitwin/actions/{id}/{name}");
            action.forms.push(Form::new("invokeaction", self.href(&path), "POST"));
            action.forms.push(Form::new("queryaction", self.href(&path), "GET"));
        }

        td.forms = vec![
            Form::new(
                "readallproperties",
                self.href(&format!("/digitwin/properties/{id}")),
                "GET",
            ),
            Form::new(
                "readallevents",
                self.href(&format!("/digitwin/events/{id}")),
                "GET",
            ),
            Form::new(
                "queryallactions",
                self.href(&format!("/digitwin/actions/{id}")),
                "GET",
            ),
            self.sse_form(
                "observeallproperties",
                &format!("/ssesc/digitwin/observe/{id}"),
            ),
            self.sse_form(
                "unobserveallproperties",
                &format!("/ssesc/digitwin/unobserve/{id}"),
            ),
            self.sse_form(
                "subscribeallevents",
                &format!("/ssesc/digitwin/subscribe/{id}"),
            ),
            self.sse_form(
                "unsubscribeallevents",
                &format!("/ssesc/digitwin/unsubscribe/{id}"),
            ),
        ];

        td.security = Some(json!(SECURITY_SCHEME));
        td.security_definitions = Some(json!({
            SECURITY_SCHEME: {
                "scheme": "bearer",
                "in": "header",
                "name": "authorization",
                "format": "jwt",
                "alg": "HS256"
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::{ActionAffordance, DataSchema, EventAffordance, PropertyAffordance};

    fn td() -> ThingDescription {
        ThingDescription::new("T1", "Thermometer")
            .with_property("x", PropertyAffordance::default())
            .with_property(
                "serial",
                PropertyAffordance {
                    schema: DataSchema {
                        read_only: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .with_event("temperature", EventAffordance::default())
            .with_action("toggle", ActionAffordance::default())
    }

    fn ops(forms: &[Form]) -> Vec<&str> {
        forms.iter().map(|f| f.op.as_str()).collect()
    }

    #[test]
    fn test_affordance_forms() {
        let mut td = td();
        FormsDecorator::new("https://hub.local:8444/").decorate(&mut td);

        let x = &td.properties["x"].forms;
        assert_eq!(
            ops(x),
            ["readproperty", "writeproperty", "observeproperty", "unobserveproperty"]
        );
        assert_eq!(x[0].href, "https://hub.local:8444/digitwin/properties/T1/x");
        assert_eq!(x[2].subprotocol.as_deref(), Some("sse"));

        assert!(!ops(&td.properties["serial"].forms).contains(&"writeproperty"));
        assert_eq!(
            td.events["temperature"].forms[0].href,
            "https://hub.local:8444/ssesc/digitwin/subscribe/T1/temperature"
        );
        assert_eq!(ops(&td.actions["toggle"].forms), ["invokeaction", "queryaction"]);
    }

    #[test]
    fn test_agent_forms_replaced() {
        let mut td = td();
        td.forms.push(Form::new("readallproperties", "http://agent/x".into(), "GET"));
        FormsDecorator::new("http://h").decorate(&mut td);
        assert!(td.forms.iter().all(|f| f.href.starts_with("http://h/")));
        assert_eq!(td.security, Some(json!("bearer_sc")));
    }

    #[test]
    fn test_decorate_is_stable() {
        let decorator = FormsDecorator::new("http://h");
        let mut once = td();
        decorator.decorate(&mut once);
        let mut twice = once.clone();
        decorator.decorate(&mut twice);
        assert_eq!(once, twice);
    }
}
