//! Tera rendering engine for template bodies.
//!
//! Bodies are registered up front so syntax errors surface at declaration
//! time, not at the first call.

use serde_yaml::Mapping;
use tera::Tera;

use hubward_core::Origin;

use crate::error::ExpandError;
use crate::template::Template;

/// Tera-backed engine holding every registered template body.
#[derive(Debug)]
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new() -> Self {
        TemplateEngine {
            tera: Tera::default(),
        }
    }

    /// Register a template body under its name.
    pub fn register(&mut self, template: &Template) -> Result<(), ExpandError> {
        self.tera
            .add_raw_template(&template.name, &template.body)
            .map_err(|source| ExpandError::TemplateSyntax {
                template: template.name.clone(),
                origin: template.origin.clone(),
                source,
            })
    }

    /// Render a template with merged call data as its context.
    ///
    /// `call_origin` is the call site, used to annotate render failures.
    pub fn render(
        &self,
        template: &Template,
        data: &Mapping,
        call_origin: &Origin,
    ) -> Result<String, ExpandError> {
        let render_err = |source: tera::Error| ExpandError::TemplateRender {
            template: template.name.clone(),
            origin: call_origin.clone(),
            source,
        };
        let context = tera::Context::from_serialize(data).map_err(render_err)?;
        self.tera.render(&template.name, &context).map_err(render_err)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
