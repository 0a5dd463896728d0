//! DDC block controller: digital downconverter with halfband + CIC
//! decimation, NCO frequency shift and fixed-point gain correction.
//!
//! Per channel the block owns input/output sample rate, input/output scaling,
//! decimation, frequency and input/output type properties. Resolvers keep them
//! consistent and push the result into the DDC registers:
//!
//! - changing `decim` coerces it, keeps the input rate and recomputes the
//!   output rate;
//! - changing the input rate keeps the output rate if a valid decimation
//!   allows it, and retunes the NCO;
//! - changing the output rate picks a decimation and back-computes the input
//!   rate;
//! - output scaling always equals input scaling times the residual gain the
//!   fixed-point scaler could not remove.

use std::ops::RangeInclusive;

use crate::action::{ActionInfo, ActionPayload, StreamCmd};
use crate::decim::{DecimCatalogue, DecimWord};
use crate::error::{DdcError, DdcResult};
use crate::gain::ResidualScaling;
use crate::invariant_ppt::{assert_invariant, STREAM_CMD_PRESERVED, STREAM_CMD_RESCALED};
use crate::node::{BlockArgs, BlockControl, NodeCore};
use crate::property::{
    PropId, PropValue, ResSourceInfo, SourceType, IO_TYPE_SC16, PROP_KEY_DECIM, PROP_KEY_FREQ,
    PROP_KEY_SAMP_RATE, PROP_KEY_SCALING, PROP_KEY_TYPE,
};
use crate::regs::{compat, ddc as reg, RegisterPort, TimeSpec};
use crate::resolver::{ResolveCtx, ResolveReport};
use crate::tuning;

/// NoC ID of the DDC block.
pub const NOC_ID: u32 = 0xDDC0_0000;
/// Block name used in unique ids.
pub const BLOCK_NAME: &str = "DDC";
pub const MAJOR_COMPAT: u16 = 0;
pub const MINOR_COMPAT: u16 = 0;

const DEFAULT_RATE: f64 = 1e9;
const DEFAULT_SCALING: f64 = 1.0;
const DEFAULT_DECIM: i64 = 1;
const DEFAULT_FREQ: f64 = 0.0;

/// Block-owned state the resolvers operate on.
#[derive(Debug)]
pub struct DdcState<R> {
    regs: R,
    fpga_compat: u32,
    catalogue: DecimCatalogue,
    residual: ResidualScaling,
    command_time: Vec<Option<TimeSpec>>,
}

impl<R: RegisterPort> DdcState<R> {
    /// Program the decimation registers and the scaling correction of `chan`.
    fn set_decim(&mut self, decim: i64, chan: usize) -> DdcResult<DecimWord> {
        let word = self.catalogue.encode(decim)?;
        self.regs
            .poke32(reg::chan_addr(reg::SR_DECIM_ADDR, chan), word.word(), None)?;
        // Rate change = N/M
        self.regs
            .poke32(reg::chan_addr(reg::SR_N_ADDR, chan), decim as u32, None)?;
        self.regs.poke32(reg::chan_addr(reg::SR_M_ADDR, chan), 1, None)?;

        let comp = self.residual.update(chan, word.cic);
        tracing::trace!(
            chan,
            total_gain = comp.total_gain,
            scaling_word = comp.scaling_word,
            residual = comp.residual,
            "updated scaling"
        );
        self.regs.poke32(
            reg::chan_addr(reg::SR_SCALE_IQ_ADDR, chan),
            comp.scaling_word as u32,
            None,
        )?;
        Ok(word)
    }

    /// Program the NCO of `chan`; returns the frequency actually achieved.
    fn set_freq(&mut self, freq: f64, input_rate: f64, chan: usize) -> DdcResult<f64> {
        let tuning = tuning::tune(freq, input_rate)?;
        let time = self.command_time.get(chan).copied().flatten();
        self.regs.poke32(
            reg::chan_addr(reg::SR_FREQ_ADDR, chan),
            tuning.freq_word as u32,
            time,
        )?;
        Ok(tuning.actual_freq)
    }
}

/// Property handles of one channel.
#[derive(Debug, Clone, Copy)]
struct ChanProps {
    samp_rate_in: PropId,
    samp_rate_out: PropId,
    scaling_in: PropId,
    scaling_out: PropId,
    decim: PropId,
    freq: PropId,
    type_in: PropId,
    type_out: PropId,
}

fn scaling_out_resolver<R: RegisterPort + 'static>(
    p: ChanProps,
    chan: usize,
) -> impl Fn(&mut ResolveCtx<'_, DdcState<R>>) -> DdcResult<()> + Send + 'static {
    move |ctx| {
        let residual = ctx.state().residual.get(chan).unwrap_or(DEFAULT_SCALING);
        let scaling_in = ctx.get_f64(p.scaling_in)?;
        ctx.set(p.scaling_out, scaling_in * residual)?;
        Ok(())
    }
}

/// DDC block controller.
#[derive(Debug)]
pub struct DdcBlock<R> {
    node: NodeCore<DdcState<R>>,
    chans: Vec<ChanProps>,
}

impl<R: RegisterPort + 'static> DdcBlock<R> {
    /// Probe the hardware through `regs`, register properties and resolvers
    /// for every channel, and push the initial configuration.
    ///
    /// Fails if the FPGA compat major version differs or the capability
    /// readbacks are out of range.
    pub fn new(mut regs: R, args: BlockArgs) -> DdcResult<Self> {
        let fpga_compat = regs.peek32(reg::RB_COMPAT_NUM)?;
        if compat::major(fpga_compat) != MAJOR_COMPAT {
            return Err(DdcError::CompatMismatch {
                block: args.unique_id,
                expected: MAJOR_COMPAT,
                actual: compat::major(fpga_compat),
            });
        }
        if compat::minor(fpga_compat) != MINOR_COMPAT {
            tracing::warn!(
                block = %args.unique_id,
                expected = %compat::format(compat::pack(MAJOR_COMPAT, MINOR_COMPAT)),
                actual = %compat::format(fpga_compat),
                "FPGA compat minor version mismatch"
            );
        }
        let num_halfbands = regs.peek32(reg::RB_NUM_HB)?;
        let cic_max_decim = regs.peek32(reg::RB_CIC_MAX_DECIM)?;
        tracing::debug!(
            block = %args.unique_id,
            "Loading DDC with {} halfbands and max CIC decimation {}",
            num_halfbands,
            cic_max_decim
        );
        let catalogue = DecimCatalogue::new(num_halfbands, cic_max_decim)?;

        let state = DdcState {
            regs,
            fpga_compat,
            catalogue,
            residual: ResidualScaling::new(args.num_inputs),
            command_time: vec![None; args.num_inputs],
        };
        let node = NodeCore::new(
            &args.unique_id,
            args.num_inputs,
            args.num_outputs,
            state,
            args.max_resolve_iterations,
        )?;
        let mut block = Self {
            node,
            chans: Vec::with_capacity(args.num_inputs),
        };
        for chan in 0..args.num_inputs {
            let props = block.register_props(chan)?;
            block.chans.push(props);
        }
        block.node.resolve_all()?;
        Ok(block)
    }

    fn register_props(&mut self, chan: usize) -> DdcResult<ChanProps> {
        let node = &mut self.node;
        let p = ChanProps {
            samp_rate_in: node.register_property(
                PROP_KEY_SAMP_RATE,
                ResSourceInfo::input(chan),
                DEFAULT_RATE,
            )?,
            samp_rate_out: node.register_property(
                PROP_KEY_SAMP_RATE,
                ResSourceInfo::output(chan),
                DEFAULT_RATE,
            )?,
            scaling_in: node.register_property(
                PROP_KEY_SCALING,
                ResSourceInfo::input(chan),
                DEFAULT_SCALING,
            )?,
            scaling_out: node.register_property(
                PROP_KEY_SCALING,
                ResSourceInfo::output(chan),
                DEFAULT_SCALING,
            )?,
            decim: node.register_property(
                PROP_KEY_DECIM,
                ResSourceInfo::user(chan),
                DEFAULT_DECIM,
            )?,
            freq: node.register_property(PROP_KEY_FREQ, ResSourceInfo::user(chan), DEFAULT_FREQ)?,
            type_in: node.register_property(
                PROP_KEY_TYPE,
                ResSourceInfo::input(chan),
                IO_TYPE_SC16,
            )?,
            type_out: node.register_property(
                PROP_KEY_TYPE,
                ResSourceInfo::output(chan),
                IO_TYPE_SC16,
            )?,
        };

        // Output scaling cannot be set; it is reset to input scaling times the
        // residual. scaling_in is declared as an output only so it may be read.
        node.add_resolver(
            "scaling_out",
            &[p.scaling_out],
            &[p.scaling_out, p.scaling_in],
            scaling_out_resolver(p, chan),
        )?;

        // Coerce decim, keep the input rate, recompute the output rate.
        node.add_resolver(
            "decim",
            &[p.decim],
            &[p.decim, p.samp_rate_out, p.scaling_in, p.samp_rate_in],
            move |ctx| {
                tracing::trace!(chan, "Calling resolver for `decim'");
                let requested = ctx.get_i64(p.decim)?;
                let decim = ctx.state().catalogue.coerce(requested as f64)?;
                ctx.set(p.decim, decim)?;
                ctx.state().set_decim(decim, chan)?;
                let rate_in = ctx.get_f64(p.samp_rate_in)?;
                ctx.set(p.samp_rate_out, rate_in / decim as f64)?;
                ctx.force_dirty(p.scaling_in)
            },
        )?;

        node.add_resolver(
            "freq",
            &[p.freq],
            &[p.freq, p.samp_rate_in],
            move |ctx| {
                tracing::trace!(chan, "Calling resolver for `freq'");
                let requested = ctx.get_f64(p.freq)?;
                let rate_in = ctx.get_f64(p.samp_rate_in)?;
                let actual = ctx.state().set_freq(requested, rate_in, chan)?;
                ctx.set(p.freq, actual)?;
                Ok(())
            },
        )?;

        // Input rate changed: keep the output rate if a valid decimation
        // allows it. The NCO works on frequencies normalized by the input
        // rate, so it must be retuned.
        node.add_resolver(
            "samp_rate_in",
            &[p.samp_rate_in],
            &[p.decim, p.samp_rate_out, p.scaling_in, p.freq],
            move |ctx| {
                tracing::trace!(chan, "Calling resolver for `samp_rate_in'");
                let rate_in = ctx.get_f64(p.samp_rate_in)?;
                let rate_out = ctx.get_f64(p.samp_rate_out)?;
                // A changed decim triggers the decim resolver next wave
                let decim = ctx.state().catalogue.coerce(rate_in / rate_out)?;
                ctx.set(p.decim, decim)?;
                ctx.set(p.samp_rate_out, rate_in / decim as f64)?;
                ctx.force_dirty(p.freq)
            },
        )?;

        // Output rate changed: like the input rate, but flipped.
        node.add_resolver(
            "samp_rate_out",
            &[p.samp_rate_out],
            &[p.decim, p.samp_rate_in],
            move |ctx| {
                tracing::trace!(chan, "Calling resolver for `samp_rate_out'");
                let rate_in = ctx.get_f64(p.samp_rate_in)?;
                let rate_out = ctx.get_f64(p.samp_rate_out)?;
                let decim = ctx.state().catalogue.coerce(rate_in / rate_out)?;
                ctx.set(p.decim, decim)?;
                // The decim resolver recomputes the output rate from the input
                // rate, so the input rate has to move first.
                if ctx.is_dirty(p.decim)? {
                    ctx.set(p.samp_rate_in, rate_out * decim as f64)?;
                }
                Ok(())
            },
        )?;

        // Input scaling is forwarded by letting the output scaling resolver
        // recompute; resolution may not be complete yet.
        node.add_resolver("scaling_in", &[p.scaling_in], &[p.scaling_out], move |ctx| {
            ctx.force_dirty(p.scaling_out)
        })?;

        node.add_resolver(
            "scaling_out",
            &[p.scaling_out],
            &[p.scaling_out, p.scaling_in],
            scaling_out_resolver(p, chan),
        )?;

        // Types are constant
        node.add_resolver("type_in", &[p.type_in], &[p.type_in], move |ctx| {
            ctx.set(p.type_in, IO_TYPE_SC16)?;
            Ok(())
        })?;
        node.add_resolver("type_out", &[p.type_out], &[p.type_out], move |ctx| {
            ctx.set(p.type_out, IO_TYPE_SC16)?;
            Ok(())
        })?;

        Ok(p)
    }

    fn chan(&self, chan: usize) -> DdcResult<ChanProps> {
        self.chans.get(chan).copied().ok_or_else(|| DdcError::NotFound {
            name: "channel".to_string(),
            scope: format!("{} (block has {})", chan, self.chans.len()),
        })
    }

    /// Reject out-of-domain values before they reach the store.
    fn validate(name: &str, value: &PropValue) -> DdcResult<()> {
        let bad = |what: String| Err(DdcError::InvalidArgument(what));
        match (name, value) {
            (PROP_KEY_DECIM, PropValue::Int(d)) if *d <= 0 => {
                bad(format!("decimation must be positive, got {}", d))
            }
            (PROP_KEY_SAMP_RATE, PropValue::Double(r)) if !(r.is_finite() && *r > 0.0) => {
                bad(format!("sample rate must be positive, got {}", r))
            }
            (PROP_KEY_FREQ | PROP_KEY_SCALING, PropValue::Double(v)) if !v.is_finite() => {
                bad(format!("{} must be finite, got {}", name, v))
            }
            _ => Ok(()),
        }
    }

    /// Reject a sample rate whose ratio to the opposite edge's rate is not a
    /// finite positive decimation request.
    fn validate_rate_ratio(&self, scope: ResSourceInfo, rate: f64) -> DdcResult<()> {
        // Unknown channels are reported by the store lookup
        let p = match self.chans.get(scope.instance) {
            Some(&p) => p,
            None => return Ok(()),
        };
        let store = self.node.store();
        let ratio = match scope.kind {
            SourceType::InputEdge => rate / store.get_f64(p.samp_rate_out)?,
            SourceType::OutputEdge => store.get_f64(p.samp_rate_in)? / rate,
            SourceType::User => return Ok(()),
        };
        if ratio.is_finite() && ratio > 0.0 {
            Ok(())
        } else {
            Err(DdcError::InvalidArgument(format!(
                "sample rate {} on {} gives decimation ratio {}",
                rate, scope, ratio
            )))
        }
    }

    /// Set the NCO frequency of `chan`.
    ///
    /// With `time`, the frequency word write is scheduled for that time; the
    /// channel's previous command time is restored afterwards. Returns the
    /// frequency actually achieved.
    pub fn set_freq(&mut self, freq: f64, chan: usize, time: Option<TimeSpec>) -> DdcResult<f64> {
        let p = self.chan(chan)?;
        Self::validate(PROP_KEY_FREQ, &PropValue::Double(freq))?;
        let prev_time = self.command_time(chan)?;
        if time.is_some() {
            self.set_command_time(chan, time)?;
        }
        let result = self.node.set(p.freq, PropValue::Double(freq));
        self.set_command_time(chan, prev_time)?;
        result?;
        self.freq(chan)
    }

    pub fn freq(&self, chan: usize) -> DdcResult<f64> {
        self.node.store().get_f64(self.chan(chan)?.freq)
    }

    /// Tunable range, one Nyquist zone around DC.
    pub fn frequency_range(&self, chan: usize) -> DdcResult<RangeInclusive<f64>> {
        let rate = self.input_rate(chan)?;
        Ok(-rate / 2.0..=rate / 2.0)
    }

    pub fn input_rate(&self, chan: usize) -> DdcResult<f64> {
        self.node.store().get_f64(self.chan(chan)?.samp_rate_in)
    }

    pub fn output_rate(&self, chan: usize) -> DdcResult<f64> {
        self.node.store().get_f64(self.chan(chan)?.samp_rate_out)
    }

    /// Every achievable output rate at the current input rate, ascending.
    pub fn output_rates(&self, chan: usize) -> DdcResult<Vec<f64>> {
        let rate_in = self.input_rate(chan)?;
        Ok(self
            .catalogue()
            .decims()
            .iter()
            .rev()
            .map(|&d| rate_in / d as f64)
            .collect())
    }

    /// Pick the decimation closest to `input_rate / rate` and apply it.
    /// Returns the decimation in effect afterwards.
    pub fn set_output_rate(&mut self, rate: f64, chan: usize) -> DdcResult<i64> {
        let p = self.chan(chan)?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(DdcError::InvalidArgument(format!(
                "output rate must be positive, got {}",
                rate
            )));
        }
        let decim = self.catalogue().coerce(self.input_rate(chan)? / rate)?;
        self.node.set(p.decim, PropValue::Int(decim))?;
        self.decim(chan)
    }

    pub fn decim(&self, chan: usize) -> DdcResult<i64> {
        self.node.store().get_i64(self.chan(chan)?.decim)
    }

    pub fn scaling_in(&self, chan: usize) -> DdcResult<f64> {
        self.node.store().get_f64(self.chan(chan)?.scaling_in)
    }

    pub fn scaling_out(&self, chan: usize) -> DdcResult<f64> {
        self.node.store().get_f64(self.chan(chan)?.scaling_out)
    }

    pub fn io_type(&self, scope: ResSourceInfo) -> DdcResult<&str> {
        let p = self.chan(scope.instance)?;
        match scope.kind {
            SourceType::InputEdge => self.node.store().get_str(p.type_in),
            SourceType::OutputEdge => self.node.store().get_str(p.type_out),
            SourceType::User => Err(DdcError::NotFound {
                name: PROP_KEY_TYPE.to_string(),
                scope: scope.to_string(),
            }),
        }
    }

    /// Gain the fixed-point scaler of `chan` could not remove.
    pub fn residual_scaling(&self, chan: usize) -> DdcResult<f64> {
        self.chan(chan)?;
        Ok(self.node.state().residual.get(chan).unwrap_or(DEFAULT_SCALING))
    }

    pub fn catalogue(&self) -> &DecimCatalogue {
        &self.node.state().catalogue
    }

    /// Raw FPGA compat word read at construction.
    pub fn fpga_compat(&self) -> u32 {
        self.node.state().fpga_compat
    }

    pub fn command_time(&self, chan: usize) -> DdcResult<Option<TimeSpec>> {
        self.chan(chan)?;
        Ok(self.node.state().command_time[chan])
    }

    /// Time attached to timed register writes of `chan` (the NCO word).
    pub fn set_command_time(&mut self, chan: usize, time: Option<TimeSpec>) -> DdcResult<()> {
        self.chan(chan)?;
        self.node.state_mut().command_time[chan] = time;
        Ok(())
    }

    /// Write the config register of `chan` unchanged.
    pub fn write_config(&mut self, chan: usize, word: u32) -> DdcResult<()> {
        self.poke_chan(reg::SR_CONFIG_ADDR, chan, word)
    }

    /// Write the mux register of `chan` unchanged.
    pub fn write_mux(&mut self, chan: usize, word: u32) -> DdcResult<()> {
        self.poke_chan(reg::SR_MUX_ADDR, chan, word)
    }

    /// Stream filter coefficients into the coefficient register of `chan`.
    pub fn write_coeffs(&mut self, chan: usize, coeffs: &[u32]) -> DdcResult<()> {
        for &coeff in coeffs {
            self.poke_chan(reg::SR_COEFFS_ADDR, chan, coeff)?;
        }
        Ok(())
    }

    fn poke_chan(&mut self, base: u32, chan: usize, word: u32) -> DdcResult<()> {
        self.chan(chan)?;
        self.node
            .state_mut()
            .regs
            .poke32(reg::chan_addr(base, chan), word, None)
    }

    pub fn regs(&self) -> &R {
        &self.node.state().regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.node.state_mut().regs
    }

    /// Issue a stream command as if it arrived on output `port`.
    ///
    /// This goes through the same handler as inbound stream command actions,
    /// so it is forwarded upstream with the sample count scaled by the
    /// decimation.
    pub fn issue_stream_cmd(&mut self, cmd: StreamCmd, port: usize) -> DdcResult<()> {
        tracing::trace!(mode = %cmd.mode.code(), port, "issue_stream_cmd");
        self.receive_action(ResSourceInfo::output(port), ActionInfo::stream_cmd(cmd))
    }

    /// Forward a stream command from edge `src` to the opposite edge,
    /// converting the sample count across the rate change.
    fn handle_stream_cmd(
        &mut self,
        src: ResSourceInfo,
        action: &ActionInfo,
        cmd: StreamCmd,
    ) -> DdcResult<()> {
        let decim = self.decim(src.instance)? as u64;
        let dst = src.invert_edge();
        tracing::trace!(
            mode = %cmd.mode.code(),
            src = %src,
            id = action.id,
            "Received stream command"
        );
        let mut fwd = cmd;
        if cmd.mode.is_num_samps() {
            // Output edge: downstream counts output samples, upstream needs
            // `decim` times as many input samples.
            let upstream = src.kind == SourceType::OutputEdge;
            fwd.num_samps = if upstream {
                cmd.num_samps.checked_mul(decim).ok_or_else(|| {
                    DdcError::InvalidArgument(format!(
                        "{} samples times decimation {} overflows",
                        cmd.num_samps, decim
                    ))
                })?
            } else {
                cmd.num_samps / decim
            };
            assert_invariant(
                STREAM_CMD_RESCALED,
                if upstream {
                    fwd.num_samps / decim == cmd.num_samps
                } else {
                    fwd.num_samps == cmd.num_samps / decim
                },
                "sample count scaled by decimation",
                Some(self.node.unique_id()),
            );
            tracing::trace!(num_samps = fwd.num_samps, "Forwarding num_samps stream command");
        } else {
            tracing::trace!("Forwarding continuous stream command");
        }
        let forwarded = action.forward(ActionPayload::StreamCmd(fwd));
        assert_invariant(
            STREAM_CMD_PRESERVED,
            forwarded.id == action.id && fwd.mode == cmd.mode,
            "forwarded command keeps mode and id",
            Some(self.node.unique_id()),
        );
        self.node.post_action(dst, forwarded);
        Ok(())
    }
}

impl<R: RegisterPort + 'static> BlockControl for DdcBlock<R> {
    fn unique_id(&self) -> &str {
        self.node.unique_id()
    }

    fn num_input_ports(&self) -> usize {
        self.node.num_ports()
    }

    fn num_output_ports(&self) -> usize {
        self.node.num_ports()
    }

    fn get_property(&self, name: &str, scope: ResSourceInfo) -> DdcResult<PropValue> {
        self.node.property(name, scope).cloned()
    }

    fn set_property(
        &mut self,
        name: &str,
        scope: ResSourceInfo,
        value: PropValue,
    ) -> DdcResult<ResolveReport> {
        Self::validate(name, &value)?;
        if let (PROP_KEY_SAMP_RATE, PropValue::Double(rate)) = (name, &value) {
            self.validate_rate_ratio(scope, *rate)?;
        }
        self.node.set_property(name, scope, value)
    }

    fn receive_action(&mut self, src: ResSourceInfo, action: ActionInfo) -> DdcResult<()> {
        if !src.is_edge() || src.instance >= self.node.num_ports() {
            return Err(DdcError::PortMismatch(format!(
                "{}: action arrived at invalid edge {}",
                self.node.unique_id(),
                src
            )));
        }
        match action.payload {
            ActionPayload::StreamCmd(cmd) => self.handle_stream_cmd(src, &action, cmd),
            ActionPayload::Other { ref key, .. } => {
                tracing::warn!(
                    block = %self.node.unique_id(),
                    key = %key,
                    src = %src,
                    "Dropping action with no handler"
                );
                Ok(())
            }
        }
    }

    fn take_outbound(&mut self) -> Vec<(ResSourceInfo, ActionInfo)> {
        self.node.take_outbound()
    }
}
