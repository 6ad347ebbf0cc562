mod args;
mod rendered_result;

use indicatif::{ProgressBar, ProgressStyle};

use hprof_delve::analysis::dominator::DominatorOptions;
use hprof_delve::dump::{DumpOptions, HeapDump};
use hprof_delve::errors::HprofDelveError;
use hprof_delve::utils::pretty_bytes_size;

use crate::args::get_args;
use crate::rendered_result::{render_summary, render_top_retained, JsonResult, RetainedStats};

fn main() -> Result<(), HprofDelveError> {
    let cli = get_args()?;

    let file_len = std::fs::metadata(&cli.input_file)?.len();
    println!(
        "Processing {} binary hprof file in {} mode.",
        pretty_bytes_size(file_len),
        if cli.in_memory { "in-memory" } else { "indexed" }
    );

    // the engine reports (fraction, message); the bar renders it
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
            .expect("templating should never fail")
            .progress_chars("#>-"),
    );
    let bar = pb.clone();
    let mut options = DumpOptions::default().on_progress(move |fraction, message| {
        bar.set_position((fraction * 1000.0) as u64);
        bar.set_message(message.to_string());
    });
    if cli.in_memory {
        options = options.in_memory();
    }

    let mut dump = HeapDump::open(&cli.input_file, options)?;
    println!("{}", render_summary(&dump, file_len));

    // first retained query builds the inbound and retained indexes
    let top_objects = dump.top_retained(cli.top)?;
    pb.finish_and_clear();

    let rows: Vec<RetainedStats> = top_objects.iter().map(RetainedStats::from_object).collect();
    println!("{}", render_top_retained(&rows, cli.top));

    if cli.dominators {
        let options = DominatorOptions {
            patterns: cli.patterns.clone(),
            ..DominatorOptions::default()
        };
        let tree_size = dump.compute_dominators(&options)?;
        println!("\nExact dominators computed for {tree_size} objects:\n");
        for (object, exact) in dump.top_exact_retained(cli.top)? {
            println!(
                "{:>12} - 0x{:x} {}",
                pretty_bytes_size(exact),
                object.address,
                object.class_name().unwrap_or("(unresolved class)")
            );
        }
    }

    if let Some(target) = cli.path_target {
        let path = dump.path_to_gc_root(target)?;
        if path.is_empty() {
            println!("\nNo GC root path found for 0x{target:x}");
        } else {
            println!("\nShortest GC root path for 0x{target:x}:");
            for node in path {
                let class_name = dump
                    .get_object(node.address)?
                    .and_then(|o| o.class_name().map(str::to_string))
                    .unwrap_or_else(|| "(unresolved class)".to_string());
                match node.edge {
                    None => println!("  0x{:x} {class_name}", node.address),
                    Some(edge) => println!("  .{edge} -> 0x{:x} {class_name}", node.address),
                }
            }
        }
    }

    if cli.json {
        JsonResult::new(rows).save_as_file()?;
    }

    Ok(())
}
