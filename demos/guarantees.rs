use clap::Parser;
use quizguarantee::{Choices, Config, SourceMapping, StderrLog};
use std::convert::TryFrom;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Clone, Debug)]
struct Args {
    /// Table of every combination with columns "Choices" and "Result".
    #[clap(long, short = 'i', default_value = quizguarantee::DEFAULT_INPUT_PATH)]
    input: PathBuf,
    /// Where to write the "Choices,Guaranteed Result" table.
    #[clap(long, short = 'o', default_value = quizguarantee::DEFAULT_OUTPUT_PATH)]
    output: PathBuf,
    /// Print the guaranteed result of these choices instead of writing the
    /// table. Example: -q 11110 -q 00004
    #[clap(long, short = 'q')]
    query: Vec<String>,
}

pub fn main() -> io::Result<()> {
    let args = Args::parse();
    let config = Config {
        input_path: args.input,
        output_path: args.output,
    };

    if args.query.is_empty() {
        quizguarantee::run(&config, &StderrLog)?;
        return Ok(());
    }

    let source = SourceMapping::load(&config.input_path)?;
    for query in &args.query {
        let choices = Choices::try_from(query.as_str())?;
        match source.guaranteed_result(choices)? {
            Some(result) => println!("{}\t{}", choices, result),
            None => println!("{}\t", choices),
        }
    }
    Ok(())
}
