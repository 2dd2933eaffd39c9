use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use netlog::{
    core::store::NetLogStore,
    net::{LogEntryDraft, ParticipantDraft, ParticipantUpdate, SessionDraft},
};

fn active_store() -> NetLogStore {
    let mut store = NetLogStore::new();
    store
        .create_session(SessionDraft {
            name: "Bench Net".to_string(),
            frequency: "146.520".to_string(),
            net_control_op: "N0NC".to_string(),
            net_control_name: "Pat".to_string(),
        })
        .expect("create");
    store.open_session().expect("open");
    store
}

fn bench_check_ins(c: &mut Criterion) {
    c.bench_function("store_check_in_5k", |b| {
        b.iter(|| {
            let mut store = active_store();
            for i in 0..5_000u32 {
                let _ = store
                    .add_participant(ParticipantDraft::call(format!("K{i}")))
                    .expect("check in");
            }
            store.drain_pending_ops()
        });
    });
}

fn bench_rename(c: &mut Criterion) {
    let mut group = c.benchmark_group("rename_propagation");
    for n in [100usize, 1_000, 10_000] {
        let mut store = active_store();
        let id = store
            .add_participant(ParticipantDraft {
                callsign: "W1ABC".to_string(),
                tactical_call: Some("BASE".to_string()),
                ..ParticipantDraft::default()
            })
            .expect("check in");
        for i in 0..n {
            let from = if i % 3 == 0 { "BASE".to_string() } else { format!("N{i}") };
            let _ = store
                .add_log_entry(LogEntryDraft::new(from, "NC", "traffic"))
                .expect("log");
        }
        store.drain_pending_ops();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let mut update = ParticipantUpdate::from(store.participant(id).expect("participant"));
                update.tactical_call = Some(if flip { "EOC" } else { "BASE" }.to_string());
                let _ = store.update_participant(id, update).expect("update");
                store.drain_pending_ops()
            });
        });
    }
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut store = active_store();
    for i in 0..2_000u32 {
        let _ = store
            .add_participant(ParticipantDraft::call(format!("W{i}")))
            .expect("check in");
    }
    c.bench_function("export_csv_4k_lines", |b| {
        b.iter(|| store.export_csv());
    });
}

criterion_group!(benches, bench_check_ins, bench_rename, bench_export);
criterion_main!(benches);
