pub mod math;
pub mod string;
pub mod time;

pub use self::{
	string::SplitInfallible,
	time::now_millis,
};
