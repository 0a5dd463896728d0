//! End-to-end property resolution on a simulated DDC.

use ddc_ctrl::ddc::DdcBlock;
use ddc_ctrl::decim::DecimWord;
use ddc_ctrl::gain;
use ddc_ctrl::regs::ddc as reg;
use ddc_ctrl::{BlockArgs, BlockControl, DdcError, PropValue, ResSourceInfo, SimRegisters, TimeSpec};
use proptest::prelude::*;

fn ddc_with_ports(ports: usize) -> DdcBlock<SimRegisters> {
    DdcBlock::new(
        SimRegisters::ddc(8, 16),
        BlockArgs::new("0/DDC#0").with_ports(ports),
    )
    .unwrap()
}

fn set_decim(block: &mut DdcBlock<SimRegisters>, chan: usize, decim: i64) {
    block
        .set_property("decim", ResSourceInfo::user(chan), PropValue::Int(decim))
        .unwrap();
}

#[test]
fn input_rate_change_keeps_output_rate() {
    let mut block = ddc_with_ports(1);
    set_decim(&mut block, 0, 10);
    assert_eq!(block.output_rate(0).unwrap(), 100e6);

    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(500e6))
        .unwrap();
    assert_eq!(block.decim(0).unwrap(), 5);
    assert_eq!(block.output_rate(0).unwrap(), 500e6 / 5.0);
    assert_eq!(block.regs().last_write(reg::SR_N_ADDR).unwrap().value, 5);
}

#[test]
fn input_rate_change_coerces_unreachable_ratio() {
    let mut block = ddc_with_ports(1);
    set_decim(&mut block, 0, 10);
    // 333e6 / 100e6 = 3.33, nearest decimation is 3
    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(333e6))
        .unwrap();
    assert_eq!(block.decim(0).unwrap(), 3);
    assert_eq!(block.output_rate(0).unwrap(), 333e6 / 3.0);
}

#[test]
fn output_rate_change_moves_input_rate() {
    let mut block = ddc_with_ports(1);
    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(200e6))
        .unwrap();
    block
        .set_property("samp_rate", ResSourceInfo::output(0), PropValue::Double(50e6))
        .unwrap();
    assert_eq!(block.decim(0).unwrap(), 4);
    assert_eq!(block.output_rate(0).unwrap(), 50e6);
    assert_eq!(block.input_rate(0).unwrap(), 200e6);
}

#[test]
fn set_output_rate_reports_decimation() {
    let mut block = ddc_with_ports(1);
    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(200e6))
        .unwrap();
    assert_eq!(block.set_output_rate(10e6, 0).unwrap(), 20);
    assert_eq!(block.output_rate(0).unwrap(), 10e6);
    let rates = block.output_rates(0).unwrap();
    assert!(rates.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*rates.last().unwrap(), 200e6);
    assert!(rates.contains(&10e6));
}

#[test]
fn decim_twelve_programs_two_halfbands() {
    let mut block = ddc_with_ports(1);
    set_decim(&mut block, 0, 12);
    let word = block.regs().last_write(reg::SR_DECIM_ADDR).unwrap().value;
    assert_eq!(DecimWord::from_word(word), DecimWord { halfbands: 2, cic: 3 });
    assert_eq!(block.regs().last_write(reg::SR_M_ADDR).unwrap().value, 1);
}

#[test]
fn neighbours_of_twelve_coerce_into_catalogue() {
    let mut block = ddc_with_ports(1);
    for requested in [11, 13] {
        set_decim(&mut block, 0, requested);
        let decim = block.decim(0).unwrap();
        assert!(block.catalogue().contains(decim));
        assert!((decim - requested).abs() <= 1);
    }
}

#[test]
fn decim_eight_has_unity_residual() {
    let mut block = ddc_with_ports(1);
    set_decim(&mut block, 0, 8);
    assert_eq!(block.residual_scaling(0).unwrap(), 1.0);
    assert_eq!(
        block.regs().last_write(reg::SR_SCALE_IQ_ADDR).unwrap().value,
        16384
    );
    assert_eq!(block.scaling_out(0).unwrap(), block.scaling_in(0).unwrap());
}

#[test]
fn cic_five_records_residual() {
    let mut block = ddc_with_ports(1);
    set_decim(&mut block, 0, 5);
    let expected = gain::compensate(2.0 * 625.0 / 1024.0);
    assert_eq!(block.residual_scaling(0).unwrap(), expected.residual);
    assert_eq!(
        block.regs().last_write(reg::SR_SCALE_IQ_ADDR).unwrap().value,
        expected.scaling_word as u32
    );
    assert_eq!(block.scaling_out(0).unwrap(), expected.residual);
}

#[test]
fn channels_are_independent() {
    let mut block = ddc_with_ports(2);
    set_decim(&mut block, 1, 6);
    assert_eq!(block.decim(0).unwrap(), 1);
    assert_eq!(block.decim(1).unwrap(), 6);
    let chan1 = reg::chan_addr(reg::SR_N_ADDR, 1);
    assert_eq!(block.regs().last_write(chan1).unwrap().value, 6);
    assert_eq!(block.regs().last_write(reg::SR_N_ADDR).unwrap().value, 1);
}

#[test]
fn frequency_is_quantized_and_wrapped() {
    let mut block = ddc_with_ports(1);
    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(100e6))
        .unwrap();
    let actual = block.set_freq(25e6, 0, None).unwrap();
    assert_eq!(actual, 25e6);
    assert_eq!(
        block.regs().last_write(reg::SR_FREQ_ADDR).unwrap().value,
        1 << 30
    );
    // Aliased request lands in the first Nyquist zone
    let actual = block.set_freq(125e6, 0, None).unwrap();
    assert_eq!(actual, 25e6);
    assert_eq!(block.frequency_range(0).unwrap(), -50e6..=50e6);
}

#[test]
fn input_rate_change_retunes_nco() {
    let mut block = ddc_with_ports(1);
    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(100e6))
        .unwrap();
    block.set_freq(25e6, 0, None).unwrap();
    block.regs_mut().clear_writes();

    block
        .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(200e6))
        .unwrap();
    assert_eq!(block.freq(0).unwrap(), 25e6);
    assert_eq!(
        block.regs().last_write(reg::SR_FREQ_ADDR).unwrap().value,
        1 << 29
    );
}

#[test]
fn command_time_applies_to_frequency_writes() {
    let mut block = ddc_with_ports(1);
    block.set_command_time(0, Some(TimeSpec(1.25))).unwrap();
    block
        .set_property("freq", ResSourceInfo::user(0), PropValue::Double(1e6))
        .unwrap();
    let write = block.regs().last_write(reg::SR_FREQ_ADDR).unwrap();
    assert_eq!(write.time, Some(TimeSpec(1.25)));
    // Decimation writes stay untimed
    set_decim(&mut block, 0, 2);
    assert_eq!(block.regs().last_write(reg::SR_DECIM_ADDR).unwrap().time, None);
}

#[test]
fn type_mismatch_rejected() {
    let mut block = ddc_with_ports(1);
    let err = block
        .set_property("decim", ResSourceInfo::user(0), PropValue::Double(4.0))
        .unwrap_err();
    assert!(matches!(err, DdcError::TypeMismatch { .. }));
    assert_eq!(block.decim(0).unwrap(), 1);
}

#[test]
fn get_property_by_key() {
    let block = ddc_with_ports(1);
    assert_eq!(
        block.get_property("type", ResSourceInfo::output(0)).unwrap(),
        PropValue::from("sc16")
    );
    assert_eq!(
        block.get_property("decim", ResSourceInfo::user(0)).unwrap(),
        PropValue::Int(1)
    );
}

proptest! {
    #[test]
    fn decim_resolves_to_catalogue_member(requested in 1i64..4000) {
        let mut block = ddc_with_ports(1);
        set_decim(&mut block, 0, requested);
        let decim = block.decim(0).unwrap();
        prop_assert!(block.catalogue().contains(decim));
        prop_assert_eq!(block.output_rate(0).unwrap(), block.input_rate(0).unwrap() / decim as f64);
        let word = block.regs().last_write(reg::SR_DECIM_ADDR).unwrap().value;
        prop_assert_eq!(DecimWord::from_word(word).decim(), decim);
    }

    #[test]
    fn input_rate_keeps_output_when_reachable(decim in 1i64..100, rate_out in 1e6f64..50e6) {
        let mut block = ddc_with_ports(1);
        let rate_in = rate_out * decim as f64;
        block
            .set_property("samp_rate", ResSourceInfo::output(0), PropValue::Double(rate_out))
            .unwrap();
        block
            .set_property("samp_rate", ResSourceInfo::input(0), PropValue::Double(rate_in))
            .unwrap();
        let resolved = block.decim(0).unwrap();
        let expected = block.catalogue().coerce(rate_in / block.output_rate(0).unwrap()).unwrap();
        prop_assert_eq!(resolved, expected);
        prop_assert_eq!(block.output_rate(0).unwrap(), rate_in / resolved as f64);
    }
}
