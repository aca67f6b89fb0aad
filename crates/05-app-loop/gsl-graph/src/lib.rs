//! Graph instance state machine (H) and datapath endpoints (I): the per-client
//! handle that drives ACDB lookups, the subgraph/global-persist pools, MDF
//! dynamic-PD registration, and the GPR transport through open/close/
//! start/stop/prepare/set_cal and read/write.

mod datapath;
mod error;
mod gkv_node;
mod instance;

pub use datapath::{DataEndpoint, Direction, EndpointConfig};
pub use error::{GraphError, GraphResult};
pub use gkv_node::GkvNode;
pub use instance::{GraphInstance, GraphInstanceConfig};
