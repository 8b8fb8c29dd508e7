use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use guestbridge::protocol::{ContainerDimensions, DisplayMode, HostContext, HostContextUpdate, Theme};
use guestbridge::sandbox::{ContentSecurityPolicy, CspDeclaration, prepare_document};

fn declaration(domains: usize) -> CspDeclaration {
    let mut declaration = CspDeclaration::new();
    for i in 0..domains {
        declaration = declaration
            .with_resource_domain(format!("https://cdn{}.example", i))
            .with_connect_domain(format!("https://api{}.example", i));
    }
    declaration
}

/// Policy synthesis for a Guest resource, run once per load
fn benchmark_csp(c: &mut Criterion) {
    let mut group = c.benchmark_group("csp");

    for domains in [0, 4, 32] {
        let decl = declaration(domains);
        group.bench_with_input(BenchmarkId::new("for_guest", domains), &decl, |b, decl| {
            b.iter(|| ContentSecurityPolicy::for_guest(Some(black_box(decl))).to_policy_string())
        });
    }

    let policy = ContentSecurityPolicy::for_guest(Some(&declaration(4)));
    let html = format!("<html><head><title>t</title></head><body>{}</body></html>", "x".repeat(64 * 1024));
    group.bench_function("prepare_document", |b| {
        b.iter(|| prepare_document(black_box(&html), &policy, Some("<script>m()</script>")))
    });

    group.finish();
}

fn context() -> HostContext {
    HostContext {
        theme: Some(Theme::Light),
        display_mode: Some(DisplayMode::Inline),
        available_display_modes: Some(vec![DisplayMode::Inline, DisplayMode::Fullscreen]),
        container_dimensions: Some(ContainerDimensions {
            width: Some(640.0),
            max_height: Some(480.0),
            ..Default::default()
        }),
        locale: Some("en-US".into()),
        time_zone: Some("Europe/Paris".into()),
        styles: Some(json!({"variables": {"--color-bg": "#fff", "--color-fg": "#111"}})),
        ..HostContext::default()
    }
}

/// Diffing runs on every Host context update, merging on every Guest receive
fn benchmark_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_context");
    let old = context();
    let mut new = old.clone();
    new.theme = Some(Theme::Dark);
    new.container_dimensions = Some(ContainerDimensions {
        width: Some(800.0),
        ..Default::default()
    });

    group.bench_function("diff_unchanged", |b| b.iter(|| black_box(&old).diff(black_box(&old))));
    group.bench_function("diff_two_keys", |b| b.iter(|| black_box(&old).diff(black_box(&new))));

    let update: HostContextUpdate = old.diff(&new);
    group.bench_function("merge", |b| b.iter(|| black_box(&old).merged(black_box(&update))));

    group.finish();
}

criterion_group!(benches, benchmark_csp, benchmark_context);
criterion_main!(benches);
