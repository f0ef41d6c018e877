//! Template rendering.
//!
//! Thin wrapper over handlebars with strict mode on: referencing a
//! variable the context does not supply is a render error, never a silent
//! blank in a generated config file. Templates are embedded at build time.

use handlebars::Handlebars;
use serde::Serialize;

use crate::errors::RenderError;

pub const WG_SERVER_TEMPLATE: &str = "wg_server.conf";
pub const WG_CLIENT_TEMPLATE: &str = "wg_client.conf";

static TEMPLATES: &[(&str, &str)] = &[
    (
        WG_SERVER_TEMPLATE,
        include_str!("../templates/wg_server.conf.hbs"),
    ),
    (
        WG_CLIENT_TEMPLATE,
        include_str!("../templates/wg_client.conf.hbs"),
    ),
];

/// Renderer over the embedded template set.
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        for (name, source) in TEMPLATES {
            registry
                .register_template_string(name, *source)
                .map_err(|source| RenderError::Template {
                    name,
                    source: Box::new(source),
                })?;
        }
        Ok(Self { registry })
    }

    pub fn render(
        &self,
        template: &'static str,
        data: &impl Serialize,
    ) -> Result<String, RenderError> {
        self.registry
            .render(template, data)
            .map_err(|source| RenderError::Render {
                name: template,
                source: Box::new(source),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_templates_compile() {
        Renderer::new().unwrap();
    }

    #[test]
    fn strict_mode_rejects_missing_variables() {
        let renderer = Renderer::new().unwrap();
        let err = renderer.render(WG_CLIENT_TEMPLATE, &json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Render { .. }));
    }

    #[test]
    fn client_template_renders() {
        let renderer = Renderer::new().unwrap();
        let text = renderer
            .render(
                WG_CLIENT_TEMPLATE,
                &json!({
                    "private_key": "pk",
                    "address": "10.0.0.2/32",
                    "dns": null,
                    "server_public_key": "spk",
                    "endpoint": "vpn1:51820",
                    "allowed_ips": "0.0.0.0/0",
                }),
            )
            .unwrap();
        assert!(text.contains("PrivateKey = pk"));
        assert!(text.contains("Endpoint = vpn1:51820"));
        assert!(!text.contains("DNS ="));
    }
}
