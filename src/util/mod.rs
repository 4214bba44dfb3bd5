pub use nsleep::*;

mod nsleep;
