//! Control plane for a digital downconverter (DDC) block of an SDR FPGA
//! pipeline.
//!
//! Each block keeps a set of typed properties (sample rates, scaling,
//! decimation, frequency). Writing one runs the block's resolvers until the
//! whole set is consistent again, and the resolvers push the results into the
//! hardware through a [`RegisterPort`]. Stream commands crossing the block are
//! rescaled by the decimation.
//!
//! ```
//! use ddc_ctrl::{BlockArgs, BlockControl, DdcBlock, PropValue, ResSourceInfo, SimRegisters};
//!
//! let mut ddc = DdcBlock::new(SimRegisters::ddc(8, 16), BlockArgs::new("0/DDC#0")).unwrap();
//! ddc.set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(200e6)).unwrap();
//! let decim = ddc.set_output_rate(10e6, 0).unwrap();
//! assert_eq!(decim, 20);
//! assert_eq!(ddc.output_rate(0).unwrap(), 10e6);
//! ```

pub mod action;
pub mod ddc;
pub mod decim;
pub mod error;
pub mod gain;
pub mod graph;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod node;
pub mod property;
pub mod registry;
pub mod regs;
pub mod resolver;
pub mod tuning;

pub use action::{ActionInfo, ActionPayload, StreamCmd, StreamMode};
pub use ddc::DdcBlock;
pub use decim::{DecimCatalogue, DecimWord};
pub use error::{DdcError, DdcResult};
pub use graph::{Edge, Graph, NodeId, TerminalAction};
pub use node::{BlockArgs, BlockControl, NodeCore};
pub use property::{PropId, PropValue, PropertyStore, ResSourceInfo, SourceType};
pub use regs::{RegisterPort, SimRegisters, TimeSpec};
pub use resolver::{ResolveCtx, ResolveReport, ResolverEngine};
