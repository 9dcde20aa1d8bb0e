//! Template generation for new documents

use chrono::{DateTime, Utc};
use rust_embed::Embed;
use tera::Tera;
use thiserror::Error;

use crate::core::identity::EntityId;

#[derive(Embed)]
#[folder = "templates/"]
struct EmbeddedTemplates;

/// Context for template generation
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub id: EntityId,
    pub author: String,
    pub created: DateTime<Utc>,
    pub title: Option<String>,
    // TP fields
    pub nominal: f64,
    pub unit: String,
    /// UUT reading tolerance in %
    pub tolerance: f64,
    /// Reference reading tolerance in %
    pub tmde_tolerance: Option<f64>,
    pub reliability: f64,
    pub required_pfa: f64,
    // INST fields
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub function: Option<String>,
}

impl TemplateContext {
    pub fn new(id: EntityId, author: String) -> Self {
        Self {
            id,
            author,
            created: Utc::now(),
            title: None,
            nominal: 10.0,
            unit: "V".to_string(),
            tolerance: 0.01,
            tmde_tolerance: None,
            reliability: 0.95,
            required_pfa: 0.02,
            manufacturer: None,
            model: None,
            function: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_nominal(mut self, nominal: f64, unit: impl Into<String>) -> Self {
        self.nominal = nominal;
        self.unit = unit.into();
        self
    }

    pub fn with_tolerance(mut self, percent: f64) -> Self {
        self.tolerance = percent;
        self
    }

    pub fn with_requirements(mut self, reliability: f64, required_pfa: f64) -> Self {
        self.reliability = reliability;
        self.required_pfa = required_pfa;
        self
    }

    pub fn with_model(mut self, manufacturer: Option<String>, model: Option<String>) -> Self {
        self.manufacturer = manufacturer;
        self.model = model;
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    fn base_context(&self) -> tera::Context {
        let mut context = tera::Context::new();
        context.insert("id", &self.id.to_string());
        context.insert("author", &self.author);
        context.insert("created", &self.created.to_rfc3339());
        context.insert("created_date", &self.created.format("%Y-%m-%d").to_string());
        context.insert("title", &self.title.clone().unwrap_or_default());
        context.insert("unit", &self.unit);
        context
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("Template rendering error: {0}")]
    RenderError(String),
}

/// Renders embedded Tera templates
pub struct TemplateGenerator {
    tera: Tera,
}

impl TemplateGenerator {
    pub fn new() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();

        for file in EmbeddedTemplates::iter() {
            let filename = file.as_ref();
            if let Some(content) = EmbeddedTemplates::get(filename) {
                if let Ok(template_str) = std::str::from_utf8(&content.data) {
                    tera.add_raw_template(filename, template_str)
                        .map_err(|e| TemplateError::RenderError(e.to_string()))?;
                }
            }
        }

        Ok(Self { tera })
    }

    fn render(&self, name: &str, context: &tera::Context) -> Result<String, TemplateError> {
        if !self.tera.get_template_names().any(|n| n == name) {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        self.tera
            .render(name, context)
            .map_err(|e| TemplateError::RenderError(e.to_string()))
    }

    /// Test point with one reference TMDE at a quarter of the UUT tolerance
    pub fn generate_test_point(&self, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut context = ctx.base_context();
        context.insert("nominal", &ctx.nominal);
        context.insert("tolerance", &ctx.tolerance);
        context.insert(
            "tmde_tolerance",
            &ctx.tmde_tolerance.unwrap_or(ctx.tolerance / 4.0),
        );
        context.insert("reliability", &ctx.reliability);
        context.insert("required_pfa", &ctx.required_pfa);
        self.render("test_point.yaml.tera", &context)
    }

    pub fn generate_instrument(&self, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut context = ctx.base_context();
        context.insert("manufacturer", &ctx.manufacturer);
        context.insert("model", &ctx.model);
        context.insert(
            "function",
            &ctx.function.clone().unwrap_or_else(|| "DCV".to_string()),
        );
        self.render("instrument.yaml.tera", &context)
    }
}
