pub mod gml;
pub mod planet;
pub mod service;
pub mod state;

pub use planet::{EdgeData, Planet, PlanetData, PlanetDefaults, ScenarioDoc};
pub use service::GalacticWarService;
pub use state::{CapitalFilter, GalacticWarState, InvalidGalacticWarGame};
