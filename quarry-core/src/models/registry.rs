use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatModel {
    pub id: String,
    pub name: String,
    pub context_length: usize,
    pub default_temperature: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub id: String,
    pub name: String,
    pub context_length: usize,
    pub embedding_dim: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Model {
    Chat(ChatModel),
    Embedding(EmbeddingModel),
}

impl Model {
    pub fn id(&self) -> &str {
        match self {
            Model::Chat(m) => &m.id,
            Model::Embedding(m) => &m.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Model::Chat(m) => &m.name,
            Model::Embedding(m) => &m.name,
        }
    }

    pub fn context_length(&self) -> usize {
        match self {
            Model::Chat(m) => m.context_length,
            Model::Embedding(m) => m.context_length,
        }
    }
}

/// Known models and their fixed properties.
///
/// The index builder asks the registry for the expected embedding dimension;
/// models missing from the registry are still usable, their dimension is then
/// taken from the first vector the provider returns.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<Model>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: default_models(),
        }
    }

    /// Registers an extra model, replacing any model with the same id.
    pub fn with_model(mut self, model: Model) -> Self {
        self.models.retain(|m| m.id() != model.id());
        self.models.push(model);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id() == id)
    }

    pub fn get_embedding(&self, id: &str) -> Option<&EmbeddingModel> {
        self.get(id).and_then(|m| match m {
            Model::Embedding(embed) => Some(embed),
            _ => None,
        })
    }

    pub fn get_chat(&self, id: &str) -> Option<&ChatModel> {
        self.get(id).and_then(|m| match m {
            Model::Chat(chat) => Some(chat),
            _ => None,
        })
    }

    /// Expected vector length for an embedding model, if known.
    pub fn embedding_dim(&self, id: &str) -> Option<usize> {
        self.get_embedding(id).map(|m| m.embedding_dim)
    }

    pub fn chat_models(&self) -> impl Iterator<Item = &ChatModel> {
        self.models.iter().filter_map(|m| match m {
            Model::Chat(chat) => Some(chat),
            _ => None,
        })
    }

    pub fn embedding_models(&self) -> impl Iterator<Item = &EmbeddingModel> {
        self.models.iter().filter_map(|m| match m {
            Model::Embedding(embed) => Some(embed),
            _ => None,
        })
    }

    pub fn all_models(&self) -> &[Model] {
        &self.models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_models() -> Vec<Model> {
    vec![
        Model::Embedding(EmbeddingModel {
            id: "nomic-embed-text".to_string(),
            name: "Nomic Embed Text".to_string(),
            context_length: 8192,
            embedding_dim: 768,
            description: "General purpose text embeddings".to_string(),
        }),
        Model::Embedding(EmbeddingModel {
            id: "mxbai-embed-large".to_string(),
            name: "mxbai Embed Large".to_string(),
            context_length: 512,
            embedding_dim: 1024,
            description: "Higher quality English embeddings".to_string(),
        }),
        Model::Embedding(EmbeddingModel {
            id: "amazon.titan-embed-text-v2:0".to_string(),
            name: "Titan Text Embeddings V2".to_string(),
            context_length: 8192,
            embedding_dim: 1024,
            description: "Titan V2 text embeddings at default dimension".to_string(),
        }),
        Model::Chat(ChatModel {
            id: "llama3.2".to_string(),
            name: "Llama 3.2".to_string(),
            context_length: 131072,
            default_temperature: 0.2,
            description: "Small instruction-tuned chat model".to_string(),
        }),
        Model::Chat(ChatModel {
            id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            name: "Claude 3 Haiku".to_string(),
            context_length: 200000,
            default_temperature: 0.2,
            description: "Fast hosted chat model".to_string(),
        }),
    ]
}
