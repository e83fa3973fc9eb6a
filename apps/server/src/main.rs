use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_auth::JwtVerifier;
use parley_config::{load as load_config, AppConfig};
use parley_database::{
    ConversationRepository, CreateConversationRequest, CreateUserRequest, User, UserRepository,
};
use parley_gateway::create_router;
use parley_runtime::{telemetry, BackendServices};
use sqlx::Row;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley messaging backend (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Seed the database with demo users and conversations
    SeedData,
    /// Print a signed access token for a user
    IssueToken {
        /// Public id of the user
        user_id: String,
    },
    /// Dump users, conversations and messages from the database
    DumpData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(&config).await,
        Commands::SeedData => seed_data(&config).await,
        Commands::IssueToken { user_id } => issue_token(&config, &user_id).await,
        Commands::DumpData => dump_data(&config).await,
    }
}

async fn run_server(config: &AppConfig) -> anyhow::Result<()> {
    info!("starting parley backend");

    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;

    let app = create_router(services.gateway.clone());

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(parley_runtime::shutdown_signal())
        .await
        .context("http server error");

    services.shutdown().await;
    info!("backend shut down");
    served
}

async fn find_or_create_user(
    users: &UserRepository,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<User> {
    if let Some(user) = users.find_by_email(email).await? {
        return Ok(user);
    }

    let user = users
        .create(&CreateUserRequest {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            display_name: None,
        })
        .await
        .with_context(|| format!("failed to create user {email}"))?;
    Ok(user)
}

async fn seed_data(config: &AppConfig) -> anyhow::Result<()> {
    info!("seeding database with demo data");

    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;
    let users = UserRepository::new(services.db_pool.clone());
    let conversations = ConversationRepository::new(services.db_pool.clone());

    let alice = find_or_create_user(&users, "alice@example.com", "Alice", "Archer").await?;
    let bob = find_or_create_user(&users, "bob@example.com", "Bob", "Baker").await?;
    let carol = find_or_create_user(&users, "carol@example.com", "Carol", "Cooper").await?;

    let direct = conversations
        .create(
            &alice.public_id,
            &CreateConversationRequest {
                participant_ids: vec![bob.public_id.clone()],
                name: None,
                is_group: Some(false),
            },
        )
        .await
        .context("failed to create direct conversation")?;

    let group = conversations
        .create(
            &alice.public_id,
            &CreateConversationRequest {
                participant_ids: vec![bob.public_id.clone(), carol.public_id.clone()],
                name: None,
                is_group: Some(true),
            },
        )
        .await
        .context("failed to create group conversation")?;

    let verifier = JwtVerifier::new(&config.auth);

    println!("Database seeded with demo data:");
    for user in [&alice, &bob, &carol] {
        let token = verifier
            .issue_token(&user.public_id)
            .with_context(|| format!("failed to issue token for {}", user.public_id))?;
        println!("- {} <{}> id={}", user.display_label(), user.email, user.public_id);
        println!("  token: {token}");
    }
    println!(
        "- conversation {} ({} participants)",
        direct.public_id,
        direct.participants.len()
    );
    println!(
        "- conversation {} \"{}\" ({} participants)",
        group.public_id,
        group.name.as_deref().unwrap_or_default(),
        group.participants.len()
    );
    println!("Run 'dump-data' to see the inserted data");

    services.shutdown().await;
    Ok(())
}

async fn issue_token(config: &AppConfig, user_id: &str) -> anyhow::Result<()> {
    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;

    let user = UserRepository::new(services.db_pool.clone())
        .find_by_public_id(user_id)
        .await?;
    services.shutdown().await;

    let user = user.with_context(|| format!("no user with id {user_id}"))?;
    let token = JwtVerifier::new(&config.auth)
        .issue_token(&user.public_id)
        .context("failed to sign token")?;

    println!("{token}");
    Ok(())
}

async fn dump_data(config: &AppConfig) -> anyhow::Result<()> {
    info!("dumping messaging data from database");

    let services = BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")?;

    let users = sqlx::query(
        r#"
        SELECT public_id, email, first_name, last_name, created_at
        FROM users
        ORDER BY id ASC
        "#,
    )
    .fetch_all(&services.db_pool)
    .await
    .context("failed to fetch users")?;

    println!("=== USERS ===");
    if users.is_empty() {
        println!("No users found in database");
    } else {
        println!(
            "{:<28} {:<30} {:<25} {:<30}",
            "Public ID", "Email", "Name", "Created At"
        );
        println!("{}", "-".repeat(116));

        for user in users {
            let public_id: String = user.get("public_id");
            let email: String = user.get("email");
            let first_name: String = user.get("first_name");
            let last_name: String = user.get("last_name");
            let created_at: String = user.get("created_at");

            println!(
                "{:<28} {:<30} {:<25} {:<30}",
                public_id,
                email,
                format!("{first_name} {last_name}").trim(),
                created_at
            );
        }
    }

    println!("\n=== CONVERSATIONS ===");
    let conversations = sqlx::query(
        r#"
        SELECT c.public_id, c.name, c.is_group, c.updated_at, COUNT(cp.user_id) AS participants
        FROM conversations c
        LEFT JOIN conversation_participants cp ON cp.conversation_id = c.id
        GROUP BY c.id
        ORDER BY c.updated_at DESC
        "#,
    )
    .fetch_all(&services.db_pool)
    .await
    .context("failed to fetch conversations")?;

    if conversations.is_empty() {
        println!("No conversations found in database");
    } else {
        println!(
            "{:<38} {:<20} {:<8} {:<12} {:<30}",
            "Public ID", "Name", "Group", "Members", "Updated At"
        );
        println!("{}", "-".repeat(112));

        for conversation in conversations {
            let public_id: String = conversation.get("public_id");
            let name: Option<String> = conversation.get("name");
            let is_group: bool = conversation.get("is_group");
            let participants: i64 = conversation.get("participants");
            let updated_at: String = conversation.get("updated_at");

            println!(
                "{:<38} {:<20} {:<8} {:<12} {:<30}",
                public_id,
                name.as_deref().unwrap_or("-"),
                is_group,
                participants,
                updated_at
            );
        }
    }

    println!("\n=== MESSAGES ===");
    let messages = sqlx::query(
        r#"
        SELECT m.public_id, c.public_id AS conversation, u.email AS sender, m.content, m.is_read, m.created_at
        FROM messages m
        JOIN conversations c ON c.id = m.conversation_id
        JOIN users u ON u.id = m.sender_id
        ORDER BY m.created_at ASC, m.id ASC
        "#,
    )
    .fetch_all(&services.db_pool)
    .await
    .context("failed to fetch messages")?;

    if messages.is_empty() {
        println!("No messages found in database");
    } else {
        println!(
            "{:<28} {:<38} {:<24} {:<42} {:<6} {:<30}",
            "Public ID", "Conversation", "Sender", "Content (truncated)", "Read", "Created At"
        );
        println!("{}", "-".repeat(172));

        for message in messages {
            let public_id: String = message.get("public_id");
            let conversation: String = message.get("conversation");
            let sender: String = message.get("sender");
            let content: String = message.get("content");
            let is_read: bool = message.get("is_read");
            let created_at: String = message.get("created_at");

            let content_display = if content.chars().count() > 40 {
                format!("{}...", content.chars().take(37).collect::<String>())
            } else {
                content
            };

            println!(
                "{:<28} {:<38} {:<24} {:<42} {:<6} {:<30}",
                public_id, conversation, sender, content_display, is_read, created_at
            );
        }
    }

    services.shutdown().await;
    Ok(())
}
