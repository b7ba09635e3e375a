use std::hint::black_box;

use codspeed_criterion_compat::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use loam::{Language, Parser};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

static JAVASCRIPT: &str = r#"
function fibonacci(n) {
    if (n < 2) { return n; }
    return fibonacci(n - 1) + fibonacci(n - 2);
}

let values = [1, 2, 3, 4, 5].map((x) => x * fibonacci(x));
const table = { first: values[0], last: values[4], label: "numbers" };
if (table.first > 0) { console.log(table.label, values); } else { report(-1); }
"#;

static RUST: &str = r#"
pub struct Point { x: i32, y: i32 }
struct Line { start: Point, end: Point }
pub fn add(a: i32, b: &mut i32) -> i32 { a + b }
fn main() { helper(1, 2) }
fn helper(a: i32, b: i32) -> i32 { a * b + 3 }
"#;

fn json_document(items: usize) -> String {
    let entries: Vec<String> = (0..items)
        .map(|index| format!(r#"{{"id": {index}, "name": "item {index}", "tags": [true, false, null]}}"#))
        .collect();
    format!("[{}]", entries.join(",\n"))
}

fn benchmark_parser(c: &mut Criterion) {
    let json = json_document(200);
    let candidates: [(&str, Language, &str); 3] = [
        ("json", loam::grammars::json(), json.as_str()),
        ("javascript", loam::grammars::javascript(), JAVASCRIPT),
        ("rust", loam::grammars::rust(), RUST),
    ];

    let mut group = c.benchmark_group("Parser Benchmark");

    for (name, language, text) in candidates {
        let mut parser = Parser::new();
        if parser.set_language(&language).is_err() {
            continue;
        }
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse_code", name), &text, |b, &text| {
            b.iter(|| black_box(parser.parse(text, None)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_parser);
criterion_main!(benches);
