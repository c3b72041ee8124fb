//! Offline provider that renders documentation from the blueprint template.

use async_trait::async_trait;
use serde_json::{json, Value};
use specforge_core::domain::Blueprint;
use specforge_core::scheduler::{AiProvider, ProviderConfig, TaskType};

use crate::generator::documentation;

/// Serves `documentation` tasks without a model, so builds run offline.
#[derive(Debug, Clone, Default)]
pub struct TemplateDocsProvider;

impl TemplateDocsProvider {
    pub const ID: &'static str = "template-docs";

    pub fn config() -> ProviderConfig {
        ProviderConfig::new(Self::ID, [TaskType::Documentation]).max_concurrent(4)
    }
}

#[async_trait]
impl AiProvider for TemplateDocsProvider {
    async fn generate(&self, task_type: TaskType, input: &Value) -> anyhow::Result<Value> {
        if task_type != TaskType::Documentation {
            anyhow::bail!("{} cannot serve {task_type} tasks", Self::ID);
        }
        let blueprint: Blueprint = serde_json::from_value(input["blueprint"].clone())?;
        let file = documentation(&blueprint);
        Ok(json!({ "path": file.path, "content": file.content }))
    }

    async fn analyze(&self, task_type: TaskType, _input: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("{} cannot serve {task_type} tasks", Self::ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::domain::{Entity, Field, FieldType};

    #[tokio::test]
    async fn renders_docs_from_blueprint_input() {
        let bp = Blueprint::new(
            "shop",
            vec![Entity::new("Order", vec![Field::new("total", FieldType::Decimal)])],
        );
        let out = TemplateDocsProvider
            .generate(TaskType::Documentation, &json!({ "blueprint": bp }))
            .await
            .unwrap();
        assert_eq!(out["path"], "docs/README.md");
        assert!(out["content"].as_str().unwrap().contains("/api/orders"));
    }

    #[tokio::test]
    async fn rejects_other_task_types() {
        let err = TemplateDocsProvider
            .generate(TaskType::CodeGeneration, &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("template-docs"));
        assert!(TemplateDocsProvider
            .analyze(TaskType::Analysis, &json!({}))
            .await
            .is_err());
    }
}
