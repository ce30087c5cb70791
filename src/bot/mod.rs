use teloxide::dispatching::dialogue::InMemStorage;

pub mod commands;
pub mod context;
pub mod engine;
pub mod flows;
pub mod handlers;
pub mod menu;
pub mod session;
pub mod state;

pub type HandlerResult = anyhow::Result<()>;
pub type SessionStorage = InMemStorage<state::Session>;

pub use commands::Command;
pub use context::AppContext;
pub use context::Settings;
pub use handlers::build_schema;
