use ddc_ctrl::ddc::DdcBlock;
use ddc_ctrl::{
    ActionInfo, BlockArgs, BlockControl, Edge, Graph, PropValue, ResSourceInfo, SimRegisters,
    StreamCmd, StreamMode,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_rate_change(c: &mut Criterion) {
    let mut block = DdcBlock::new(SimRegisters::ddc(8, 16), BlockArgs::new("0/DDC#0")).unwrap();
    let rates = [200e6, 250e6, 184.32e6, 122.88e6];
    let mut i = 0;

    c.bench_function("resolve_input_rate_change", |b| {
        b.iter(|| {
            i = (i + 1) % rates.len();
            let report = block
                .set_property(
                    "samp_rate",
                    ResSourceInfo::input(0),
                    PropValue::Double(black_box(rates[i])),
                )
                .unwrap();
            block.regs_mut().clear_writes();
            black_box(report);
        })
    });
}

fn bench_full_resolution(c: &mut Criterion) {
    // Worst case: every property of a 4-channel block dirty at once
    c.bench_function("construct_ddc_4ch", |b| {
        b.iter(|| {
            let block = DdcBlock::new(
                SimRegisters::ddc(8, 16),
                BlockArgs::new("0/DDC#0").with_ports(4),
            )
            .unwrap();
            black_box(block);
        })
    });
}

fn bench_stream_cmd_chain(c: &mut Criterion) {
    let mut graph = Graph::new();
    let mut prev = None;
    for i in 0..8 {
        let args = BlockArgs::new(&format!("0/DDC#{}", i));
        let mut block = DdcBlock::new(SimRegisters::ddc(8, 16), args).unwrap();
        block
            .set_property("decim", ResSourceInfo::user(0), PropValue::Int(2))
            .unwrap();
        let id = graph.add_block(Box::new(block));
        if let Some(p) = prev {
            graph.connect(Edge::new(p, 0, id, 0)).unwrap();
        }
        prev = Some(id);
    }
    let tail = prev.unwrap();

    c.bench_function("stream_cmd_8_hops", |b| {
        b.iter(|| {
            let cmd = StreamCmd::num_samps(StreamMode::NumSampsAndDone, black_box(4096));
            let out = graph
                .post_action(tail, ResSourceInfo::output(0), ActionInfo::stream_cmd(cmd))
                .unwrap();
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_rate_change, bench_full_resolution, bench_stream_cmd_chain);
criterion_main!(benches);
