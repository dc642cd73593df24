use std::error::Error;
use std::sync::Arc;

use rten_tensor::prelude::*;
use rten_tensor::NdTensor;

use recpipe::{Charset, InputPipeline, LineSource, PipelineParams, LINE_CHANNELS, LINE_HEIGHT};

/// Symbols the synthetic captions are drawn from. Must match the charset the
/// recognition model is trained against.
const OUT_CHARSET: &str = "0123456789abcdefghijklmnopqrstuvwxyz ";

/// Horizontal pixels allotted to each caption character.
const CHAR_WIDTH: usize = 7;

/// Blank pixels on each side of a rendered caption.
const MARGIN: usize = 4;

/// Stand-in for an image generator: renders captions of random words as
/// crude stripe patterns on a white background, pre-grayed across all three
/// channels.
///
/// The output is not legible text; it only has to exercise the pipeline with
/// realistic shapes, so each character becomes a dark stripe whose intensity
/// is derived from the character code.
struct SyntheticLineSource {
    rng: fastrand::Rng,
    symbols: Vec<char>,
}

impl SyntheticLineSource {
    fn new(seed: u64) -> SyntheticLineSource {
        SyntheticLineSource {
            rng: fastrand::Rng::with_seed(seed),
            symbols: OUT_CHARSET.chars().filter(|ch| *ch != ' ').collect(),
        }
    }

    fn random_caption(&mut self) -> String {
        let n_words = self.rng.usize(1..=3);
        let mut caption = String::new();
        for word in 0..n_words {
            if word > 0 {
                caption.push(' ');
            }
            for _ in 0..self.rng.usize(2..=8) {
                let symbol = self.symbols[self.rng.usize(0..self.symbols.len())];
                caption.push(symbol);
            }
        }
        caption
    }

    fn render(caption: &str) -> NdTensor<u8, 3> {
        let n_chars = caption.chars().count();
        let width = n_chars * CHAR_WIDTH + 2 * MARGIN;
        let mut image = NdTensor::full([LINE_HEIGHT, width, LINE_CHANNELS], 255u8);

        for (cell, ch) in caption.chars().enumerate() {
            if ch == ' ' {
                continue;
            }
            let ink = (ch as u32 % 128) as u8;
            let left = MARGIN + cell * CHAR_WIDTH + 1;
            for y in 8..LINE_HEIGHT - 8 {
                for x in left..left + CHAR_WIDTH - 2 {
                    for chan in 0..LINE_CHANNELS {
                        image[[y, x, chan]] = ink;
                    }
                }
            }
        }

        image
    }
}

impl LineSource for SyntheticLineSource {
    fn next_line(&mut self) -> anyhow::Result<(String, NdTensor<u8, 3>)> {
        let caption = self.random_caption();
        let image = Self::render(&caption);
        Ok((caption, image))
    }
}

struct Args {
    /// Number of batches to pull from the pipeline.
    batches: usize,

    /// Examples per batch.
    batch_size: usize,

    /// Preprocessing worker threads.
    threads: usize,

    /// Drop captions longer than this many characters.
    max_text: Option<usize>,

    /// Seed for the synthetic generator.
    seed: u64,

    /// Enable debug output.
    debug: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut batches = 10;
    let mut batch_size = 32;
    let mut threads = 4;
    let mut max_text = None;
    let mut seed = 42;
    let mut debug = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('n') | Long("batches") => {
                batches = parser.value()?.parse()?;
            }
            Short('b') | Long("batch-size") => {
                batch_size = parser.value()?.parse()?;
            }
            Short('t') | Long("threads") => {
                threads = parser.value()?.parse()?;
            }
            Long("max-text") => {
                max_text = Some(parser.value()?.parse()?);
            }
            Long("seed") => {
                seed = parser.value()?.parse()?;
            }
            Long("debug") => {
                debug = true;
            }
            Long("help") => {
                println!(
                    "Stream synthetic training batches and print their shapes.

Usage: {bin_name} [OPTIONS]

Options:

  -n, --batches <count>

    Number of batches to pull before exiting (default 10).

  -b, --batch-size <size>

    Examples per batch (default 32).

  -t, --threads <count>

    Preprocessing worker threads (default 4).

  --max-text <chars>

    Drop captions longer than this many characters.

  --seed <seed>

    Seed for the synthetic caption generator (default 42).

  --debug

    Enable debug output.
",
                    bin_name = parser.bin_name().unwrap_or("recpipe")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Args {
        batches,
        batch_size,
        threads,
        max_text,
        seed,
        debug,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args()?;

    let charset = Arc::new(Charset::new(OUT_CHARSET)?);
    let source = SyntheticLineSource::new(args.seed);

    let mut params = PipelineParams {
        num_threads: args.threads,
        batch_size: args.batch_size,
        debug: args.debug,
        ..Default::default()
    };
    if let Some(max_text) = args.max_text {
        params.filter = Some(Arc::new(move |example| {
            example.text.chars().count() <= max_text
        }));
    }

    let pipeline = InputPipeline::spawn(source, charset, params)?;

    for (index, batch) in pipeline.take(args.batches).enumerate() {
        let batch = batch?;
        let min_width = batch.widths.iter().min().copied().unwrap_or(0);
        let max_width = batch.widths.iter().max().copied().unwrap_or(0);
        let mean_length =
            batch.lengths.iter().sum::<i32>() as f32 / batch.lengths.len().max(1) as f32;

        println!(
            "batch {}: {} examples, images {:?}, widths {}..={}, labels {}, mean length {:.1}, e.g. {:?}",
            index,
            batch.len(),
            batch.images.shape(),
            min_width,
            max_width,
            batch.labels.len(),
            mean_length,
            batch.texts.first().map(String::as_str).unwrap_or(""),
        );
    }

    Ok(())
}
