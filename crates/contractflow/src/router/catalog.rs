//! Model identities: the four routing roles, alias normalization and pricing.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::{BackendConfig, ModelRoles, RouterSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Low-cost model used for most documents.
    DefaultWorker,
    /// High-capability model for complex or scanned documents.
    ExpertFallback,
    /// Last resort when both of the above fail.
    ReserveChannel,
    /// Cheapest model, used only in testing mode.
    Testing,
}

impl ModelRole {
    /// Order used when one model id fills several roles.
    const LOOKUP_ORDER: [ModelRole; 4] = [
        ModelRole::DefaultWorker,
        ModelRole::ExpertFallback,
        ModelRole::ReserveChannel,
        ModelRole::Testing,
    ];

    /// Alias keys that resolve to this role's model unless the config
    /// overrides them.
    fn builtin_aliases(self) -> &'static [&'static str] {
        match self {
            ModelRole::DefaultWorker => &["deepseek", "default"],
            ModelRole::ExpertFallback => &["claude", "expert"],
            ModelRole::ReserveChannel => &["gpt", "openai", "reserve"],
            ModelRole::Testing => &["test", "testing"],
        }
    }
}

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    roles: ModelRoles,
    aliases: HashMap<String, String>,
    pricing: HashMap<String, ModelPricing>,
}

impl ModelCatalog {
    pub fn new(router: &RouterSettings, backends: &[BackendConfig]) -> Self {
        let roles = router.models.clone();

        let mut aliases = HashMap::new();
        for role in ModelRole::LOOKUP_ORDER {
            let model = role_model(&roles, role);
            for alias in role.builtin_aliases() {
                aliases.insert((*alias).to_string(), model.to_string());
            }
        }
        for (alias, model) in &router.aliases {
            aliases.insert(normalize_key(alias), model.clone());
        }

        let pricing = backends
            .iter()
            .map(|b| {
                (
                    b.model.clone(),
                    ModelPricing {
                        input_per_million: b.input_price_per_million,
                        output_per_million: b.output_price_per_million,
                    },
                )
            })
            .collect();

        Self {
            roles,
            aliases,
            pricing,
        }
    }

    pub fn model_for(&self, role: ModelRole) -> &str {
        role_model(&self.roles, role)
    }

    /// The first role (in lookup order) that `model` fills.
    pub fn role_of(&self, model: &str) -> Option<ModelRole> {
        ModelRole::LOOKUP_ORDER
            .into_iter()
            .find(|role| self.model_for(*role) == model)
    }

    /// Resolves an alias or loosely spelled model name to a model id.
    ///
    /// Lookup is case-insensitive and ignores surrounding whitespace. Names
    /// that are neither an alias nor a known model come back trimmed and
    /// lowercased.
    pub fn normalize(&self, name: &str) -> String {
        let key = normalize_key(name);
        if let Some(model) = self.aliases.get(&key) {
            return model.clone();
        }
        self.known_models()
            .find(|model| model.eq_ignore_ascii_case(&key))
            .map(str::to_string)
            .unwrap_or(key)
    }

    pub fn pricing(&self, model: &str) -> Option<ModelPricing> {
        self.pricing.get(model).copied()
    }

    fn known_models(&self) -> impl Iterator<Item = &str> {
        ModelRole::LOOKUP_ORDER
            .into_iter()
            .map(move |role| self.model_for(role))
            .chain(self.pricing.keys().map(String::as_str))
    }
}

fn role_model(roles: &ModelRoles, role: ModelRole) -> &str {
    match role {
        ModelRole::DefaultWorker => &roles.default_worker,
        ModelRole::ExpertFallback => &roles.expert_fallback,
        ModelRole::ReserveChannel => &roles.reserve_channel,
        ModelRole::Testing => &roles.testing,
    }
}

fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}
