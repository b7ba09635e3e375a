use std::hint::black_box;

use codspeed_criterion_compat::{Criterion, Throughput, criterion_group, criterion_main};
use loam::{InputEdit, Parser, Point, TextSize};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn statements(count: usize) -> String {
    (0..count).map(|index| format!("let value{index} = compute({index}, [{index}, 2]);\n")).collect()
}

fn benchmark_reparse(c: &mut Criterion) {
    let old_text = statements(300);
    let offset = old_text.len() / 2;
    let offset = old_text[offset..].find('(').map_or(offset, |found| offset + found + 1);
    let new_text = format!("{}1 + {}", &old_text[..offset], &old_text[offset..]);
    let start_position = Point::of(old_text[..offset].as_bytes());
    let edit = InputEdit {
        start_byte: TextSize::new(offset as u32),
        old_end_byte: TextSize::new(offset as u32),
        new_end_byte: TextSize::new(offset as u32 + 4),
        start_position,
        old_end_position: start_position,
        new_end_position: Point::new(start_position.row, start_position.column + 4),
    };

    let mut parser = Parser::new();
    if parser.set_language(&loam::grammars::javascript()).is_err() {
        return;
    }
    let Some(mut old_tree) = parser.parse(&old_text, None) else {
        return;
    };
    old_tree.edit(&edit);

    let mut group = c.benchmark_group("Incremental Benchmark");
    group.throughput(Throughput::Bytes(new_text.len() as u64));
    group.bench_function("reparse_after_insertion", |b| {
        b.iter(|| black_box(parser.parse(&new_text, Some(&old_tree))));
    });
    group.bench_function("parse_from_scratch", |b| {
        b.iter(|| black_box(parser.parse(&new_text, None)));
    });
    group.finish();
}

criterion_group!(benches, benchmark_reparse);
criterion_main!(benches);
