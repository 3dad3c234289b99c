//! The collaborative side of fissa: the room session store, the foreground
//! resync trigger and the add-to-queue flow.

mod draft;
mod events;
mod resync;
mod session;

#[cfg(test)]
mod testing;

pub use draft::*;
pub use events::*;
pub use resync::*;
pub use session::*;
