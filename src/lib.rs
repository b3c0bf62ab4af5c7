//! Cable-wrap rotation tracker for alt-azimuth telescope mounts.
//!
//! An alt-az mount can turn its azimuth axis without limit, but the cables
//! running through it cannot. This library keeps a signed running total of
//! azimuth rotation since the last reset, from a stream of position samples
//! that only ever report the azimuth modulo 360°.
//!
//! ## Pieces
//!
//! - [`astro`]: azimuth estimation and wraparound folding
//! - [`classifier`]: motion state machine turning samples into deltas
//! - [`accumulator`]: the signed total, crossings, threshold alert and
//!   home drift snap
//! - [`unwind`]: cancellable maneuver that drives the total back to zero
//! - [`persistence`]: state and settings records on disk
//! - [`engine`]: [`WrapEngine`](engine::WrapEngine) tying it all together
//! - [`actor`]: message-passing front end processing samples in order
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = EngineConfig::load_from("cable-wrap.toml")?;
//! let engine = Arc::new(WrapEngine::open(&config));
//! let (handle, _task) =
//!     EngineActor::new(engine, mount, config.persistence.save_interval).spawn();
//! handle.send_sample(sample).await?;
//! println!("{:+.1}°", handle.snapshot().await?.total_degrees);
//! ```

pub mod accumulator;
pub mod actor;
pub mod astro;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod mount;
pub mod persistence;
pub mod sample;
pub mod state;
pub mod unwind;
