//! Process-wide subgraph pool (F) and global-persist-calibration pool (G).

mod glb_persist;
mod subgraph;

pub use glb_persist::{AddResult, GlbPersistEntry, GlbPersistPool};
pub use subgraph::{CachedCal, SubgraphPool, SubgraphRecord};

