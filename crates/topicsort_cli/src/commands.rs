use anyhow::{Context as _, Result};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use topicsort_api::{create_router, StaticTokens, TopicsApi};
use topicsort_core::{
    open_db, AnalyzeRequest, CategorizeService, EngineConfig, EntrySuggestions, KeywordOracle,
    OwnerId, ProposalSet, SqliteTaxonomyStore, StaticOracle, SuggestionOracle,
};

/// Settings shared by every command.
pub struct Context {
    db_path: PathBuf,
    owner_id: OwnerId,
    config: EngineConfig,
    suggestions: Option<PathBuf>,
}

impl Context {
    pub fn new(
        db_path: PathBuf,
        owner_id: OwnerId,
        config: EngineConfig,
        suggestions: Option<PathBuf>,
    ) -> Self {
        Self {
            db_path,
            owner_id,
            config,
            suggestions,
        }
    }

    fn oracle(&self) -> Result<Arc<dyn SuggestionOracle>> {
        let Some(path) = &self.suggestions else {
            return Ok(Arc::new(KeywordOracle));
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read suggestions {}", path.display()))?;
        let records: Vec<EntrySuggestions> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse suggestions {}", path.display()))?;
        Ok(Arc::new(StaticOracle::from_records(records)))
    }

    /// Opens the database and runs `f` against a fresh service.
    fn with_service<T>(
        &self,
        f: impl FnOnce(&mut CategorizeService<SqliteTaxonomyStore<'_>>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = open_db(&self.db_path)
            .with_context(|| format!("failed to open database {}", self.db_path.display()))?;
        let store = SqliteTaxonomyStore::try_new(&mut conn)?;
        let mut service = CategorizeService::new(store, self.oracle()?, self.config.clone());
        f(&mut service)
    }
}

pub fn topics(context: &Context) -> Result<()> {
    context.with_service(|service| {
        for view in service.list_topic_views(context.owner_id)? {
            println!("{:>6}  {:>5}  {}", view.wire_id(), view.entry_count(), view.name());
        }
        Ok(())
    })
}

pub fn add_topic(context: &Context, name: &str) -> Result<()> {
    context.with_service(|service| {
        let topic = service.create_topic(context.owner_id, name)?;
        println!("created topic {} `{}`", topic.id, topic.name);
        Ok(())
    })
}

pub fn add_entry(context: &Context, content: &str, topic_id: Option<i64>) -> Result<()> {
    context.with_service(|service| {
        let entry = service.create_entry(context.owner_id, content, topic_id)?;
        println!("created entry {}", entry.id);
        Ok(())
    })
}

pub fn analyze(
    context: &Context,
    instructions: Option<String>,
    topics_to_keep: Vec<i64>,
    out: &Path,
) -> Result<()> {
    let request = AnalyzeRequest {
        instructions,
        topics_to_keep,
    };
    let set = context.with_service(|service| Ok(service.analyze(context.owner_id, &request)?))?;

    let json = serde_json::to_string_pretty(&set)?;
    fs::write(out, json).with_context(|| format!("failed to write {}", out.display()))?;

    let metadata = &set.metadata;
    println!(
        "analyzed {} entries: {} to existing topics, {} to {} new topics, {} unassigned",
        metadata.total_entries_analyzed,
        metadata.assigned_to_existing,
        metadata.assigned_to_new,
        set.new_topic_proposals.len(),
        metadata.unassigned
    );
    println!("proposal written to {}", out.display());
    Ok(())
}

pub fn apply(context: &Context, proposal: &Path, ignore_version: bool) -> Result<()> {
    let raw = fs::read_to_string(proposal)
        .with_context(|| format!("failed to read {}", proposal.display()))?;
    let set: ProposalSet = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", proposal.display()))?;
    let expected_version = (!ignore_version).then_some(set.snapshot_version);

    let result = context
        .with_service(|service| Ok(service.apply(context.owner_id, &set, expected_version)?))?;

    if result.already_applied {
        println!("proposal already applied (taxonomy version {})", result.taxonomy_version);
        return Ok(());
    }
    for topic in &result.created_topics {
        println!("created topic {} `{}`", topic.id, topic.name);
    }
    println!(
        "moved {} entries, created {} topics (taxonomy version {})",
        result.entries_reassigned, result.topics_created, result.taxonomy_version
    );
    Ok(())
}

pub fn quick(context: &Context, entry_ids: &[i64]) -> Result<()> {
    let proposals =
        context.with_service(|service| Ok(service.quick_categorize(context.owner_id, entry_ids)?))?;
    println!("{}", serde_json::to_string_pretty(&proposals)?);
    Ok(())
}

/// Serves the topics API until the process is stopped. `token` is the only
/// accepted bearer credential and maps to the context's owner.
pub fn serve(context: &Context, addr: SocketAddr, token: &str) -> Result<()> {
    let tokens = StaticTokens::new().with_token(token, context.owner_id);
    let api = TopicsApi::new(
        context.db_path.clone(),
        context.oracle()?,
        context.config.clone(),
        Arc::new(tokens),
    );
    // Migrations run before the first request.
    open_db(&context.db_path)
        .with_context(|| format!("failed to open database {}", context.db_path.display()))?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        println!("serving topics API on http://{addr}");
        axum::serve(listener, create_router(Arc::new(api)))
            .await
            .context("server stopped")
    })
}
