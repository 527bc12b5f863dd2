// main.rs
// Description: Binary entry point with menu loop. Runs the encoder layer stage by stage,
//              shows the published tensors and lets the user change tokens and shape.
// History:
// - 2026-10-17: Replace train/ask/checkpoint menu with the stage runner.
// - 2026-10-17: Optional JSON config path as first argument, input stage runs on startup.
// - 2026-10-17: Leave the menu loop when stdin is closed.

use std::io::{BufRead, Write};

use transformer_viz::stage::{Stage, STAGE_ORDER};
use transformer_viz::utils;
use transformer_viz::{Pipeline, StageReport, VizConfig};

// `Ok(None)` once the input is closed.
fn read_line_trimmed<R: BufRead>(reader: &mut R) -> Result<Option<String>, String> {
    let mut s_input = String::new();
    let i_read = reader
        .read_line(&mut s_input)
        .map_err(|_| "input_read_error".to_string())?;
    if i_read == 0 {
        return Ok(None);
    }
    Ok(Some(s_input.trim().to_string()))
}

fn prompt_line(s_label: &str) -> Result<Option<String>, String> {
    print!("{}", s_label);
    let _ = std::io::stdout().flush();
    read_line_trimmed(&mut std::io::stdin().lock())
}

fn prompt(s_label: &str) -> Result<String, String> {
    prompt_line(s_label)?.ok_or_else(|| "end_of_input".to_string())
}

fn prompt_usize(s_label: &str) -> Result<usize, String> {
    let s_val = prompt(s_label)?;
    s_val
        .parse::<usize>()
        .map_err(|_| format!("not a non-negative integer: {}", s_val))
}

fn print_report(report: &StageReport) {
    if report.is_ok() {
        println!("[ok] {}", report.message);
        if !report.tensors.is_empty() {
            println!("     tensors: {}", report.tensors.join(", "));
        }
    } else {
        println!("[error] {}", report.message);
    }
}

fn print_status(pipeline: &Pipeline, cfg: &VizConfig) {
    println!("\n{}", pipeline.info_line(&cfg.model));
    let v_buttons: Vec<String> = STAGE_ORDER
        .iter()
        .map(|&st| {
            let s_mark = if pipeline.is_stage_enabled(st) { " " } else { "x" };
            format!("[{}] {}", s_mark, st.label())
        })
        .collect();
    println!("{}", v_buttons.join("  "));
}

fn print_tensors(pipeline: &Pipeline) {
    let v_tensors = pipeline.named_tensors();
    if v_tensors.is_empty() {
        println!("No tensors yet.");
        return;
    }
    for t in v_tensors {
        println!("\n{}", utils::format_matrix(&t.name, &t.view.to_owned()));
    }
}

fn print_head(pipeline: &Pipeline, i_head: usize) {
    let h = pipeline.head_tensors(i_head);
    let v_parts = [
        (format!("Q_Head_{}", i_head), h.q),
        (format!("K_Head_{}", i_head), h.k),
        (format!("V_Head_{}", i_head), h.v),
        (format!("Scores_H{}", i_head), h.scaled_scores),
        (format!("Weights_H{}", i_head), h.weights),
        (format!("Output_H{}", i_head), h.output),
    ];
    let mut b_any = false;
    for (s_name, opt_a) in v_parts.iter() {
        if let Some(a) = opt_a {
            println!("\n{}", utils::format_matrix(s_name, a));
            b_any = true;
        }
    }
    if !b_any {
        println!("Head {} has no tensors yet.", i_head);
    }
}

fn main() {
    env_logger::init();

    let mut cfg = match std::env::args().nth(1) {
        Some(s_path) => match VizConfig::load(&s_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        },
        None => VizConfig::default(),
    };

    let mut pipeline = Pipeline::new();
    let report = pipeline.run_stage(Stage::Input, &cfg.model, &cfg.input_text);
    print_report(&report);

    loop {
        print_status(&pipeline, &cfg);
        println!("\n--- Menu Mode ---");
        println!("Commands:");
        println!("  1-7 Run stage");
        println!("  i Set tokens (comma separated)");
        println!("  w Set d_model");
        println!("  h Set Num Heads");
        println!("  f Set d_ff (empty for d_model * 4)");
        println!("  s Show tensors");
        println!("  k Show one head");
        println!("  j Print JSON snapshot");
        println!("  c Load config");
        println!("  e Exit");

        let s_cmd = match prompt_line("\nEnter command: ") {
            Ok(Some(s)) => s.to_lowercase(),
            Ok(None) => {
                println!("Exit.");
                break;
            }
            Err(e) => {
                println!("Input error: {}", e);
                continue;
            }
        };

        if s_cmd == "e" {
            println!("Exit.");
            break;
        }

        if let Some(stage) = s_cmd
            .parse::<usize>()
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(Stage::from_index)
        {
            let report = pipeline.run_stage(stage, &cfg.model, &cfg.input_text);
            print_report(&report);
            continue;
        }

        match s_cmd.as_str() {
            "i" => match prompt("Enter tokens: ") {
                Ok(s) => {
                    cfg.input_text = s;
                    println!("Tokens updated, run stage 1 to apply.");
                }
                Err(e) => println!("Input error: {}", e),
            },
            "w" => match prompt_usize("Enter d_model: ") {
                Ok(i) => cfg.model.set_model_width(i),
                Err(e) => println!("Input error: {}", e),
            },
            "h" => match prompt_usize("Enter Num Heads: ") {
                Ok(i) => cfg.model.set_head_count(i),
                Err(e) => println!("Input error: {}", e),
            },
            "f" => match prompt("Enter d_ff: ") {
                Ok(s) if s.is_empty() => cfg.model.set_feed_forward_width(None),
                Ok(s) => match s.parse::<usize>() {
                    Ok(i) => cfg.model.set_feed_forward_width(Some(i)),
                    Err(_) => println!("Input error: not a non-negative integer: {}", s),
                },
                Err(e) => println!("Input error: {}", e),
            },
            "s" => {
                print_tensors(&pipeline);
                println!(
                    "\nLayers: {} | parameters: {}",
                    pipeline.network_description(),
                    pipeline.total_parameters()
                );
            }
            "k" => match prompt_usize("Enter head index: ") {
                Ok(i) => print_head(&pipeline, i),
                Err(e) => println!("Input error: {}", e),
            },
            "j" => match utils::to_json_pretty(&pipeline.snapshot()) {
                Ok(s) => println!("{}", s),
                Err(e) => println!("Snapshot failed: {}", e),
            },
            "c" => match prompt("Enter config path: ") {
                Ok(s_path) => match VizConfig::load(&s_path) {
                    Ok(c) => {
                        cfg = c;
                        pipeline.reset();
                        let report = pipeline.run_stage(Stage::Input, &cfg.model, &cfg.input_text);
                        print_report(&report);
                    }
                    Err(e) => println!("Load failed: {}", e),
                },
                Err(e) => println!("Input error: {}", e),
            },
            _ => println!("Unknown command."),
        }
    }
}
