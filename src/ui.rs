//! Interface de terminal do batch-classify: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente
//! a execução de um lote no terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatcher::Progress;
use crate::pricing::CostEstimate;
use crate::report::{HISTOGRAM_BINS, RunSummary};

// Largura máxima das barras dos histogramas.
const HISTOGRAM_WIDTH: usize = 30;

/// Indicador visual de progresso para a execução de um lote no terminal.
///
/// A mensagem mostra a concorrência atual, o RPM medido, a confiança média
/// e a contagem de erros; cada limite de taxa atingido é impresso acima da barra.
pub struct RunProgress {
    pb: ProgressBar,
    red: Style,
    yellow: Style,
    confidence: RunningMean,
}

/// Média acumulada da confiança dos resultados pontuados neste run.
#[derive(Debug, Default)]
struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

impl RunProgress {
    /// Inicia a barra para `total` itens pendentes.
    pub fn start(total: u64) -> Self {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            confidence: RunningMean::default(),
        }
    }

    /// Avança a barra após cada resultado registrado.
    pub fn update(&mut self, progress: &Progress<'_>) {
        self.pb.inc(1);
        if let Some(confidence) = &progress.confidence {
            self.confidence.add(confidence.top1);
        }
        if progress.result.is_rate_limited() {
            self.pb.println(format!(
                "  {} {}: rate limited, concurrency now {}",
                self.yellow.apply_to("↻"),
                progress.result.id,
                progress.limiter.effective_concurrency()
            ));
        }

        let limiter = progress.limiter;
        let errors = progress.results.error_count();
        let errors = if errors > 0 {
            self.red.apply_to(format!("{errors} errors")).to_string()
        } else {
            "0 errors".to_string()
        };
        let confidence = match self.confidence.mean() {
            Some(mean) => format!("conf {mean:.2}"),
            None => "conf -".to_string(),
        };
        self.pb.set_message(format!(
            "conc {} | {} rpm | avg {}ms | {} queued, {} in flight | {confidence} | {errors}",
            limiter.effective_concurrency(),
            limiter.current_rpm(),
            limiter.avg_latency_ms(),
            progress.queued,
            progress.in_flight,
        ));
    }

    /// Finaliza a barra, indicando se o lote foi interrompido.
    pub fn finish(&self, stopped: bool) {
        if stopped {
            self.pb.abandon_with_message("stopped");
        } else {
            self.pb.finish_and_clear();
        }
    }
}

/// Imprime o resumo de um conjunto de resultados.
pub fn print_summary(summary: &RunSummary, show_rows: bool) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    println!();
    println!("{}", Style::new().bold().apply_to("─── Summary ───"));
    println!("  Total:        {}", summary.total);
    println!("  {} Success:    {}", green.apply_to("✓"), summary.successes);
    println!("  {} Errors:     {}", red.apply_to("✗"), summary.errors);
    println!("  Fingerprints: {}", summary.fingerprints.len());
    println!("  Duration:     {:.1}s", summary.total_duration_ms as f64 / 1000.0);
    println!("  Cost:         ${:.4}", summary.total_cost);

    match (summary.mean_confidence, summary.mean_margin) {
        (Some(conf), Some(margin)) => {
            println!("  Confidence:   {conf:.3} mean over {} rows", summary.scored);
            println!("  Margin:       {margin:.3} mean");
            print_histogram("Confidence", &summary.confidence_bins);
            print_histogram("Margin", &summary.margin_bins);
        }
        _ => println!("  {}", dim.apply_to("No token probabilities recorded.")),
    }

    if show_rows {
        println!();
        for row in &summary.rows {
            let glyph = if row.success {
                green.apply_to("✓")
            } else {
                red.apply_to("✗")
            };
            let scores = match (row.confidence, row.margin) {
                (Some(c), Some(m)) => format!("conf {c:.3} margin {m:.3}"),
                _ => "-".to_string(),
            };
            println!(
                "  {glyph} {:<12} {:<30} {:>6}ms  {}",
                row.id,
                truncate(&row.value, 30),
                row.duration_ms,
                dim.apply_to(scores)
            );
        }
    }
}

fn print_histogram(title: &str, bins: &[usize; HISTOGRAM_BINS]) {
    let cyan = Style::new().cyan();
    let max = bins.iter().copied().max().unwrap_or(0).max(1);

    println!();
    println!("  {title}");
    for (i, count) in bins.iter().enumerate() {
        let width = count * HISTOGRAM_WIDTH / max;
        let low = i as f64 / HISTOGRAM_BINS as f64;
        println!(
            "  {low:.1}-{:.1} │{} {count}",
            low + 0.1,
            cyan.apply_to("█".repeat(width))
        );
    }
}

/// Imprime a estimativa de custo para o comando `estimate`.
pub fn print_estimate(model: &str, rows: usize, estimate: Option<&CostEstimate>, rpm: f64) {
    let yellow = Style::new().yellow();

    println!("{}", Style::new().bold().apply_to("─── Estimate ───"));
    println!("  Model:         {model}");
    println!("  Rows:          {rows}");
    match estimate {
        Some(est) => {
            println!("  Input tokens:  {}", est.total_input_tokens);
            println!("  Output tokens: {}", est.total_output_tokens);
            println!("  Input cost:    ${:.4}", est.input_cost);
            println!("  Output cost:   ${:.4}", est.output_cost);
            println!("  Total cost:    ${:.4}", est.total_cost);
        }
        None => println!("  {} No pricing known for {model}", yellow.apply_to("!")),
    }
    println!("  Rate limit:    {rpm} rpm");
    if rpm > 0.0 {
        let minutes = rows as f64 / rpm;
        println!("  Minimum time:  {minutes:.1} min");
    }
}

/// Mensagem final após um run com erros restantes.
pub fn print_resume_hint(errors: usize, out: &std::path::Path) {
    let yellow = Style::new().yellow();
    println!();
    println!(
        "  {} {errors} rows failed; rerun with --resume {} to retry them",
        yellow.apply_to("↻"),
        out.display()
    );
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut out: String = flat.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
