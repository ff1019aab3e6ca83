pub mod control;
pub mod requests;
pub mod responses;
pub mod step;
pub mod viewport;

pub use control::*;
pub use requests::*;
pub use responses::*;
pub use step::*;
pub use viewport::*;
