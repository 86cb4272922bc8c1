//! Consultation orchestration.
//!
//! [`ChatEngine`] wires the pipeline together for one [`Session`]:
//!
//! ```text
//! symptom ─▶ embed ─▶ index query ─▶ prompt ─▶ generate ─▶ reply
//!                                                   │
//!                                                   └─▶ record store
//! ```
//!
//! Stage failures are distinct ([`PipelineError`]) and never abort a turn:
//! a retrieval failure leaves the candidate list empty, a generation failure
//! substitutes the configured fallback reply, and a record failure is only
//! reported. Each is logged and surfaced in [`TurnOutcome::warnings`].

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ChatConfig, Config};
use crate::embedding::{self, EmbeddingProvider};
use crate::generation::{self, GenerationError, GenerationProvider};
use crate::index::{self, VectorIndex};
use crate::models::{ChatMessage, Constitution, DiagnosisRecord, IndexMatch};
use crate::prompt::{build_prescription_prompt, format_herb_context, PromptInput};
use crate::records::{self, RecordStore};
use crate::secrets::Secrets;

/// Which pipeline stage failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("index query failed: {0:#}")]
    Index(anyhow::Error),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("record store failed: {0:#}")]
    Records(anyhow::Error),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Embedding(_) => "embedding",
            PipelineError::Index(_) => "index",
            PipelineError::Generation(_) => "generation",
            PipelineError::Records(_) => "records",
        }
    }
}

/// A non-fatal problem encountered during a turn.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TurnWarning {
    pub stage: &'static str,
    pub message: String,
}

impl From<&PipelineError> for TurnWarning {
    fn from(err: &PipelineError) -> Self {
        Self {
            stage: err.stage(),
            message: err.to_string(),
        }
    }
}

/// One user's consultation state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub constitution: Option<Constitution>,
    pub messages: Vec<ChatMessage>,
    /// The most recent `history_turns` diagnoses, including this session's.
    pub history: Vec<DiagnosisRecord>,
    /// True when the user has no saved constitution yet.
    pub is_new_user: bool,
}

/// Result of one [`ChatEngine::ask`] call.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub herbs: Vec<IndexMatch>,
    /// False when the fallback reply was used.
    pub generated: bool,
    pub recorded: bool,
    pub warnings: Vec<TurnWarning>,
}

pub struct ChatEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationProvider>,
    records: Arc<dyn RecordStore>,
    config: ChatConfig,
}

impl ChatEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationProvider>,
        records: Arc<dyn RecordStore>,
        config: ChatConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            records,
            config,
        }
    }

    /// Build every component from configuration. Fails fast when a remote
    /// provider is enabled without its API key.
    pub async fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let embedder = embedding::create_provider(&config.embedding, secrets)?;
        let index = index::create_index(&config.index, secrets)?;
        let generator = generation::create_generator(&config.generation, secrets)?;
        let records = records::open_store(&config.records, secrets).await?;
        info!(
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            index = %config.index.provider,
            records = %config.records.backend,
            "chat engine ready"
        );
        Ok(Self::new(embedder, index, generator, records, config.chat.clone()))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Log in: look up the saved constitution and prior history. Record
    /// store failures are logged and treated as "nothing saved yet".
    pub async fn start_session(&self, user_id: &str) -> Result<Session> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            bail!("user id must not be empty");
        }

        // Unreachable store: treat as a first visit.
        let constitution = match self.records.get_user_constitution(user_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id, error = %format!("{:#}", e), "could not load constitution");
                None
            }
        };
        let history = match self
            .records
            .history(user_id, self.config.history_turns)
            .await
        {
            Ok(h) => h,
            Err(e) => {
                warn!(user_id, error = %format!("{:#}", e), "could not load history");
                Vec::new()
            }
        };

        info!(
            user_id,
            constitution = constitution.map(|c| c.key()).unwrap_or("none"),
            prior = history.len(),
            "session started"
        );

        Ok(Session {
            user_id: user_id.to_string(),
            constitution,
            messages: vec![ChatMessage::assistant(self.config.greeting.clone())],
            history,
            is_new_user: constitution.is_none(),
        })
    }

    /// Record the user's constitution (first registration only) and use it
    /// for the rest of the session.
    pub async fn set_constitution(
        &self,
        session: &mut Session,
        constitution: Constitution,
    ) -> Result<()> {
        let added = self
            .records
            .register_user(&session.user_id, constitution)
            .await?;
        if !added {
            info!(user_id = %session.user_id, "user already registered; keeping saved record");
        }
        session.constitution = Some(constitution);
        session.is_new_user = false;
        Ok(())
    }

    /// Embed and query only.
    pub async fn retrieve(&self, text: &str, top_k: usize) -> Result<Vec<IndexMatch>, PipelineError> {
        let vector = self
            .embedder
            .embed(text)
            .await
            .map_err(PipelineError::Embedding)?;
        self.index
            .query(&vector, top_k)
            .await
            .map_err(PipelineError::Index)
    }

    /// Run one consultation turn.
    pub async fn ask(&self, session: &mut Session, symptom: &str) -> Result<TurnOutcome> {
        let symptom = symptom.trim();
        if symptom.is_empty() {
            bail!("symptom must not be empty");
        }

        let mut warnings = Vec::new();
        session.messages.push(ChatMessage::user(symptom));

        let herbs = match self.retrieve(symptom, self.config.top_k).await {
            Ok(m) => m,
            Err(e) => {
                warn!(stage = e.stage(), error = %e, "retrieval failed; continuing without candidates");
                warnings.push(TurnWarning::from(&e));
                Vec::new()
            }
        };

        let herb_list = format_herb_context(&herbs, &self.config.default_category);
        let prompt = build_prescription_prompt(PromptInput {
            symptom,
            constitution: session.constitution,
            herb_list: &herb_list,
            history: &session.history,
        });

        let (reply, generated) = match self.generator.generate(&prompt).await {
            Ok(text) => (text, true),
            Err(e) => {
                let e = PipelineError::from(e);
                warn!(error = %e, "generation failed; using fallback reply");
                warnings.push(TurnWarning::from(&e));
                (self.config.fallback_reply.clone(), false)
            }
        };

        session.messages.push(ChatMessage::assistant(reply.clone()));

        let record = DiagnosisRecord::now(
            &session.user_id,
            symptom,
            &self.config.diagnosis_label,
            &reply,
            self.config.summary_chars,
        );
        let recorded = match self.records.save_diagnosis(&record).await {
            Ok(()) => true,
            Err(e) => {
                let e = PipelineError::Records(e);
                warn!(error = %e, "could not save diagnosis");
                warnings.push(TurnWarning::from(&e));
                false
            }
        };
        session.history.push(record);
        let excess = session
            .history
            .len()
            .saturating_sub(self.config.history_turns);
        session.history.drain(..excess);

        info!(
            user_id = %session.user_id,
            herbs = herbs.len(),
            generated,
            recorded,
            "turn complete"
        );

        Ok(TurnOutcome {
            reply,
            herbs,
            generated,
            recorded,
            warnings,
        })
    }
}
