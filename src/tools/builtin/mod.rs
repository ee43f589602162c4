//! Built-in tools that come with the agent.

mod shopping;

pub use shopping::{AddItemTool, SHOPPING_LIST_KEY};
