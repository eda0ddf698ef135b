pub mod budget;
pub mod building;
pub mod cell;
pub mod constants;
pub mod error;
pub mod field;
pub mod footprint;
pub mod greedy;
pub mod improve;
pub mod logistics;
pub mod planner;
pub mod recipe;
pub mod router;
pub mod score;
pub mod state;

pub use budget::AttemptBudget;
pub use building::{Building, BuildingKind, Liquid, LiquidConnection, ModuleTier};
pub use cell::{Cell, Direction};
pub use error::PlanError;
pub use field::{Field, Rect, ZoneFlags};
pub use footprint::Footprint;
pub use greedy::GreedyPlanner;
pub use improve::Improver;
pub use planner::{LayoutPlanner, LogSink, ProgressSink};
pub use recipe::{RecipeBook, RecipeInfo};
pub use router::FlowRouter;
pub use score::ScoreModel;
pub use state::State;
