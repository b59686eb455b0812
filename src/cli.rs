use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::app::App;
use crate::error::Result;
use crate::models::{parse_tags, Post, PostDraft, PostFilter, ProfileEdit, Role};
use crate::notify::Topic;
use crate::session::Registration;

#[derive(Parser)]
#[command(name = "folio", version, about = "A small multi-author blog backed by a local store")]
pub struct Cli {
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List published posts, featured first.
    List {
        #[arg(long)]
        category: Option<String>,
        /// Case-insensitive match on title and excerpt.
        #[arg(long)]
        search: Option<String>,
    },
    /// Render a post by id or slug. Counts as a view.
    Show { post: String },
    /// Categories with their published post counts.
    Categories,
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Create an author account.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Set a password. Needed once for seeded accounts.
    SetPassword {
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Edit the signed-in user's profile.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Publish a new post.
    Write {
        #[command(flatten)]
        post: PostArgs,
    },
    /// Replace the editable fields of a post.
    Edit {
        id: String,
        #[command(flatten)]
        post: PostArgs,
    },
    Delete { id: String },
    /// Stats and posts visible to the signed-in user.
    Dashboard,
    Users,
    SetRole { user_id: String, role: Role },
    SetActive {
        user_id: String,
        /// true/false, yes/no, on/off.
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        active: bool,
    },
    DeleteUser { user_id: String },
    /// Print the listing again whenever another process changes the store.
    Watch {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

#[derive(clap::Args)]
pub struct PostArgs {
    #[arg(long)]
    pub title: String,
    /// Markdown file with the post body.
    #[arg(long)]
    pub file: PathBuf,
    #[arg(long)]
    pub excerpt: Option<String>,
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long, default_value = "")]
    pub category: String,
    /// Comma-separated.
    #[arg(long, default_value = "")]
    pub tags: String,
}

impl PostArgs {
    fn into_draft(self) -> Result<PostDraft> {
        let content = std::fs::read_to_string(&self.file)?;
        Ok(PostDraft {
            title: self.title,
            content,
            excerpt: self.excerpt.unwrap_or_default(),
            featured_image: self.image,
            category: self.category,
            tags: parse_tags(&self.tags),
        })
    }
}

pub fn run(app: &mut App, command: Commands) -> Result<()> {
    match command {
        Commands::List { category, search } => {
            print_listing(app, &PostFilter { category, search });
        }
        Commands::Show { post } => {
            let rendered = app.open_post(&post)?;
            println!("{}", rendered.post.title);
            println!(
                "{} | {} | {} min read | {} views",
                rendered.author_name,
                rendered.post.display_date().format("%Y-%m-%d"),
                rendered.reading_minutes,
                rendered.post.view_count
            );
            if !rendered.post.tags.is_empty() {
                println!("#{}", rendered.post.tags.join(" #"));
            }
            println!();
            println!("{}", rendered.html);
        }
        Commands::Categories => {
            for category in app.categories() {
                println!("{:<16} {:>3}  {}", category.name, category.post_count, category.description);
            }
        }
        Commands::Login { email, password } => {
            let user = app.sign_in(&email, &password)?;
            println!("Signed in as {} ({})", user.name, user.role);
        }
        Commands::Logout => {
            app.sign_out()?;
            println!("Signed out");
        }
        Commands::Whoami => match app.current_user() {
            Some(user) => println!("{} <{}> {}", user.name, user.email, user.role),
            None => println!("Not signed in"),
        },
        Commands::Register {
            name,
            email,
            password,
            confirm_password,
            bio,
            avatar,
        } => {
            let user = app.register(Registration {
                name,
                email,
                password,
                confirm_password,
                bio,
                avatar,
            })?;
            println!("Registered {} as {}", user.email, user.id);
        }
        Commands::SetPassword { email, password } => {
            app.set_password(&email, &password)?;
            println!("Password set for {}", email);
        }
        Commands::Profile { name, bio, avatar } => {
            let user = app.update_profile(ProfileEdit { name, bio, avatar })?;
            println!("Updated profile of {}", user.name);
        }
        Commands::Write { post } => {
            let post = app.save_new_post(post.into_draft()?)?;
            println!("Published {} ({})", post.slug, post.id);
        }
        Commands::Edit { id, post } => {
            let post = app.edit_post(&id, post.into_draft()?)?;
            println!("Saved {}", post.id);
        }
        Commands::Delete { id } => {
            app.delete_post(&id)?;
            println!("Deleted {}", id);
        }
        Commands::Dashboard => {
            let dashboard = app.dashboard()?;
            println!("Signed in as {} ({})", dashboard.user.name, dashboard.user.role);
            println!(
                "Posts: {}  Published: {}  Drafts: {}  Views: {}",
                dashboard.posts.len(),
                dashboard.published,
                dashboard.drafts,
                dashboard.total_views
            );
            println!();
            for post in dashboard.recent() {
                print_post_line(post);
            }
            if let Some(users) = &dashboard.users {
                println!();
                println!("{} users", users.len());
            }
        }
        Commands::Users => {
            for user in app.users()? {
                let state = if user.is_active { "active" } else { "inactive" };
                println!("{:<38} {:<32} {:<12} {}", user.id, user.email, user.role, state);
            }
        }
        Commands::SetRole { user_id, role } => {
            app.set_role(&user_id, role)?;
            println!("{} is now {}", user_id, role);
        }
        Commands::SetActive { user_id, active } => {
            app.set_active(&user_id, active)?;
            println!("{} is now {}", user_id, if active { "active" } else { "inactive" });
        }
        Commands::DeleteUser { user_id } => {
            app.delete_user(&user_id)?;
            println!("Deleted user {}", user_id);
        }
        Commands::Watch { interval_ms } => watch(app, Duration::from_millis(interval_ms))?,
    }
    Ok(())
}

fn print_post_line(post: &Post) {
    println!(
        "{:<38} {:<10} {} {:>5}  {}",
        post.id,
        post.status.as_str(),
        post.display_date().format("%Y-%m-%d"),
        post.view_count,
        post.title
    );
}

fn print_listing(app: &mut App, filter: &PostFilter) {
    let listing = app.blog_listing(filter);
    if !listing.featured.is_empty() {
        println!("Featured");
        for post in &listing.featured {
            println!("  * {}  by {}  [{}]", post.title, app.author_name(&post.author_id), post.slug);
        }
        println!();
    }
    if listing.regular.is_empty() {
        println!("No posts match.");
    }
    for post in &listing.regular {
        println!("{}  by {}  [{}]", post.title, app.author_name(&post.author_id), post.slug);
        println!("    {}", post.excerpt);
    }
}

fn watch(app: &mut App, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(anyhow::anyhow!("--interval-ms must be positive").into());
    }
    print_listing(app, &PostFilter::default());
    loop {
        std::thread::sleep(interval);
        if app.sync_external()? {
            tracing::debug!("{} received", Topic::StorageChanged);
            println!();
            print_listing(app, &PostFilter::default());
        }
    }
}
