use {
    anyhow::Result,
    clap::Subcommand,
    wagate_sessions::{SessionRecord, SessionStore, StoreHandle, StoreWriter},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List stored sessions.
    List,
    /// Add a session record; it is brought up on the next restoration.
    Add {
        /// Operator-chosen session id (e.g. tenant name).
        id: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Forget a stored session.
    Remove { id: String },
}

pub async fn handle_sessions(action: SessionAction, store: SessionStore) -> Result<()> {
    let handle = StoreWriter::spawn(store);
    match action {
        SessionAction::List => list(&handle).await,
        SessionAction::Add { id, description } => add(&handle, &id, &description).await,
        SessionAction::Remove { id } => remove(&handle, &id).await,
    }
}

fn render_table(records: &[SessionRecord]) -> String {
    if records.is_empty() {
        return "no sessions stored".into();
    }
    let width = records
        .iter()
        .map(|r| r.id.len())
        .max()
        .unwrap_or(0)
        .max("ID".len());
    let mut out = format!("{:<width$}  READY  DESCRIPTION", "ID");
    for r in records {
        let ready = if r.ready { "yes" } else { "no" };
        out.push_str(&format!("\n{:<width$}  {ready:<5}  {}", r.id, r.description));
    }
    out
}

async fn list(handle: &StoreHandle) -> Result<()> {
    let records = handle.read_all().await?;
    println!("{}", render_table(&records));
    Ok(())
}

async fn add(handle: &StoreHandle, id: &str, description: &str) -> Result<()> {
    if handle
        .insert_if_absent(SessionRecord::new(id, description))
        .await?
    {
        println!("Added session {id}");
    } else {
        println!("Session {id} already exists");
    }
    Ok(())
}

async fn remove(handle: &StoreHandle, id: &str) -> Result<()> {
    match handle.remove(id).await? {
        Some(_) => println!("Removed session {id}"),
        None => println!("No session {id}"),
    }
    Ok(())
}
