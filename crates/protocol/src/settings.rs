use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f64 = 0.3;
pub const DEFAULT_RESULT_COUNT: u32 = 3;

/// How the backend retrieves supporting documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Hybrid,
    Vectors,
    Text,
}

/// Which embedding fields vector search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VectorField {
    #[default]
    Embedding,
    ImageEmbedding,
    Both,
}

/// Inputs fed to the multimodal approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MultimodalInput {
    #[default]
    TextAndImages,
    Images,
    Texts,
}

/// Per-turn override bundle sent under `context.overrides`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_category: Option<String>,
    #[serde(default = "default_result_count")]
    pub top: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub minimum_reranker_score: f64,
    #[serde(default)]
    pub minimum_search_score: f64,
    #[serde(default)]
    pub retrieval_mode: RetrievalMode,
    #[serde(default = "default_true")]
    pub semantic_ranker: bool,
    #[serde(default)]
    pub semantic_captions: bool,
    #[serde(default)]
    pub suggest_followup_questions: bool,
    #[serde(default)]
    pub use_oid_security_filter: bool,
    #[serde(default)]
    pub use_groups_security_filter: bool,
    #[serde(default = "default_vector_fields")]
    pub vector_fields: Vec<VectorField>,
    #[serde(default, rename = "use_gpt4v")]
    pub use_multimodal: bool,
    #[serde(default, rename = "gpt4v_input")]
    pub multimodal_input: MultimodalInput,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            prompt_template: None,
            exclude_category: None,
            top: DEFAULT_RESULT_COUNT,
            temperature: DEFAULT_TEMPERATURE,
            minimum_reranker_score: 0.0,
            minimum_search_score: 0.0,
            retrieval_mode: RetrievalMode::default(),
            semantic_ranker: true,
            semantic_captions: false,
            suggest_followup_questions: false,
            use_oid_security_filter: false,
            use_groups_security_filter: false,
            vector_fields: default_vector_fields(),
            use_multimodal: false,
            multimodal_input: MultimodalInput::default(),
        }
    }
}

impl Overrides {
    /// Blank free-text fields are omitted from the wire rather than sent empty.
    pub fn normalized(mut self) -> Self {
        self.prompt_template = non_blank(self.prompt_template);
        self.exclude_category = non_blank(self.exclude_category);
        if self.vector_fields.is_empty() {
            self.vector_fields = default_vector_fields();
        }
        self
    }
}

/// Settings that shape one turn: streaming plus the override bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSettings {
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub overrides: Overrides,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            stream: true,
            overrides: Overrides::default(),
        }
    }
}

impl TurnSettings {
    pub fn normalized(mut self) -> Self {
        self.overrides = self.overrides.normalized();
        self
    }

    /// Narrows the settings to what the deployed backend actually supports.
    pub fn apply_features(&mut self, features: &BackendFeatures) {
        self.overrides.semantic_ranker = features.show_semantic_ranker_option;
        if !features.show_vector_option {
            self.overrides.retrieval_mode = RetrievalMode::Text;
        }
        if !features.show_gpt4v_options {
            self.overrides.use_multimodal = false;
        }
    }
}

/// Capability flags served by the backend's `/config` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFeatures {
    #[serde(default, rename = "showGPT4VOptions")]
    pub show_gpt4v_options: bool,
    #[serde(default)]
    pub show_semantic_ranker_option: bool,
    #[serde(default)]
    pub show_vector_option: bool,
    #[serde(default)]
    pub show_user_upload: bool,
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_result_count() -> u32 {
    DEFAULT_RESULT_COUNT
}

fn default_vector_fields() -> Vec<VectorField> {
    vec![VectorField::Embedding]
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn default_overrides_serialize_with_wire_names() {
        let value = serde_json::to_value(Overrides::default()).unwrap();

        assert_eq!(
            value,
            json!({
                "top": 3,
                "temperature": 0.3,
                "minimum_reranker_score": 0.0,
                "minimum_search_score": 0.0,
                "retrieval_mode": "hybrid",
                "semantic_ranker": true,
                "semantic_captions": false,
                "suggest_followup_questions": false,
                "use_oid_security_filter": false,
                "use_groups_security_filter": false,
                "vector_fields": ["embedding"],
                "use_gpt4v": false,
                "gpt4v_input": "textAndImages"
            })
        );
    }

    #[test]
    fn blank_prompt_template_is_dropped() {
        let overrides = Overrides {
            prompt_template: Some("   ".to_string()),
            exclude_category: Some(" legal ".to_string()),
            vector_fields: Vec::new(),
            ..Overrides::default()
        }
        .normalized();

        assert_eq!(overrides.prompt_template, None);
        assert_eq!(overrides.exclude_category.as_deref(), Some("legal"));
        assert_eq!(overrides.vector_fields, vec![VectorField::Embedding]);
    }

    #[test]
    fn missing_vector_search_falls_back_to_text_retrieval() {
        let mut settings = TurnSettings::default();
        settings.overrides.use_multimodal = true;

        settings.apply_features(&BackendFeatures {
            show_gpt4v_options: false,
            show_semantic_ranker_option: false,
            show_vector_option: false,
            show_user_upload: true,
        });

        assert_eq!(settings.overrides.retrieval_mode, RetrievalMode::Text);
        assert!(!settings.overrides.semantic_ranker);
        assert!(!settings.overrides.use_multimodal);
    }

    #[test]
    fn backend_features_parse_camel_case_payload() {
        let features: BackendFeatures = serde_json::from_value(json!({
            "showGPT4VOptions": true,
            "showSemanticRankerOption": true,
            "showVectorOption": false,
            "showUserUpload": false
        }))
        .unwrap();

        assert!(features.show_gpt4v_options);
        assert!(features.show_semantic_ranker_option);
        assert!(!features.show_vector_option);
    }
}
