// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

pub mod parser;

use anyhow::Error;
use clap::{App, Arg};
use config::Config;
use controller::{Controller, Id, Restaurant, ReviewChanges, ToTable, Unit};
use engine::Engine;
use memory::MemoryController;
use mongo::MongoController;
use parser::Statement;
use simplelog::{LevelFilter, TermLogger, TerminalMode};
use std::collections::HashMap;

macro_rules! prompt {
    ($ed:ident, $name:expr) => {{
        use rustyline::error::ReadlineError;

        match $ed.readline(&format!("({}) {}", $name, PROMPT)) {
            Ok(line) => {
                $ed.add_history_entry(line.as_str());
                Ok(line)
            }

            Err(ReadlineError::Interrupted) => {
                continue;
            }

            Err(ReadlineError::Eof) => {
                println!("Exiting...Good bye!");
                break;
            }

            Err(e) => Err(e),
        }
    }};
}

type Seeder<'a> = Option<&'a dyn Fn(&str) -> Restaurant>;

fn print_help(can_seed: bool) {
    println!("Statements:");
    println!("restaurant(<id>)                        Show a restaurant");
    println!("review(<id>)                            Show a review");
    println!("rate(<author>, <restaurant>, <n>[, '<comment>'])");
    println!("                                        Write a review");
    println!("rerate(<review>, <author>, <n>)         Change the rating of a review");
    println!("comment(<review>, <author>, '<text>')   Change the comment of a review");
    println!("unrate(<review>, <author>)              Delete a review");
    println!("like(<review>, <user>)                  Toggle a like");
    println!("dislike(<review>, <user>)               Toggle a dislike");
    println!("average(<restaurant>)                   Recompute the average rating");
    println!("rank(<restaurant>)                      Refresh the ranking score");
    println!("mode                                    Show the transaction mode");
    if can_seed {
        println!("add_restaurant('<name>')                Add an approved restaurant");
    }
    println!("q | quit                                Quit");
}

fn execute<C: Controller>(
    engine: &Engine<'_, C>,
    statement: Statement,
    seed: Seeder<'_>,
) -> Result<(), Error> {
    let controller = engine.controller();

    match statement {
        Statement::Restaurant(id) => {
            let id: Id = id.parse()?;
            match controller.restaurant(&id, &mut Unit::NoTransaction)? {
                Some(restaurant) => println!("{}", restaurant.to_table()),
                None => println!("Couldn't found restaurant with id({})", id),
            }
        }

        Statement::Review(id) => {
            let id: Id = id.parse()?;
            match controller.review(&id, &mut Unit::NoTransaction)? {
                Some(review) => println!("{}", review.to_table()),
                None => println!("Couldn't found review with id({})", id),
            }
        }

        Statement::Rate {
            author,
            restaurant,
            rating,
            comment,
        } => {
            let review = engine.create_review(&author, &restaurant, rating, comment)?;
            println!("{}", review.to_table());
        }

        Statement::Rerate {
            review,
            author,
            rating,
        } => {
            let changes = ReviewChanges {
                rating: Some(rating),
                ..Default::default()
            };

            let review = engine.update_review(&review, &author, changes)?;
            println!("{}", review.to_table());
        }

        Statement::Comment {
            review,
            author,
            comment,
        } => {
            let changes = ReviewChanges {
                comment: Some(comment),
                ..Default::default()
            };

            let review = engine.update_review(&review, &author, changes)?;
            println!("{}", review.to_table());
        }

        Statement::Unrate { review, author } => {
            let review = engine.delete_review(&review, &author)?;
            println!("Deleted review({})", review.id);
        }

        Statement::React {
            review,
            actor,
            kind,
        } => {
            let review = engine.toggle_reaction(&review, &actor, kind)?;
            println!("{}", review.to_table());
        }

        Statement::Average(restaurant) => {
            let summary = engine.recompute_average(&restaurant)?;
            println!(
                "Average rating is {} over {} reviews",
                summary.average_rating, summary.review_count
            );
        }

        Statement::Rank(restaurant) => {
            let id: Id = restaurant.parse()?;
            let inputs = controller.ranking_inputs(&id, &mut Unit::NoTransaction)?;
            println!("{}", inputs.to_table());

            let score = engine.refresh_ranking(&restaurant)?;
            println!("Ranking score is {}", score);
        }

        Statement::Mode => match engine.coordinator().is_atomic() {
            Some(true) => println!("Units run inside transactions"),
            Some(false) => println!("Units run without transactions"),
            None => println!("Transaction support not probed yet"),
        },

        Statement::AddRestaurant(name) => match seed {
            Some(seed) => println!("{}", seed(&name).to_table()),
            None => println!("Restaurants can only be added to the in-memory store"),
        },
    }

    Ok(())
}

fn shell<C: Controller>(engine: &Engine<'_, C>, name: &str, seed: Seeder<'_>) -> Result<(), Error> {
    let mut rl = rustyline::Editor::<()>::new();

    loop {
        let line: String = prompt!(rl, name)?;

        match line.trim() {
            "?" | "h" | "help" => print_help(seed.is_some()),

            "q" | "quit" => {
                println!("Bye!");
                break;
            }

            "v" | "version" => {
                println!("version: {}", VERSION);
            }

            empty if empty.is_empty() => {}

            line => match parser::parse_line(line) {
                Some(statement) => {
                    if let Err(e) = execute(engine, statement, seed) {
                        log::error!("{}", e);
                    }
                }

                None => println!("Invalid syntax!"),
            },
        }
    }

    Ok(())
}

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PROMPT: &str = ">> ";

fn main() -> Result<(), Error> {
    let matches = App::new("review-ranking")
        .version(VERSION)
        .about("Admin shell for restaurant reviews, ratings and rankings")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("memory")
                .long("memory")
                .help("Use an in-memory store instead of MongoDB"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Log verbosity, repeat for more"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if TermLogger::init(level, simplelog::Config::default(), TerminalMode::Mixed).is_err() {
        eprintln!("Couldn't initialize the terminal logger");
    }

    let mut config = match matches.value_of("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let vars: HashMap<String, String> = dotenv::vars().collect();
    if let Some(url) = vars.get("MONGO_URL") {
        config.database.mongo_url = url.clone();
    }
    if let Some(db) = vars.get("MONGO_DB") {
        config.database.mongo_db = db.clone();
    }

    println!("Welcome to review-ranking {}", VERSION);

    if matches.is_present("memory") {
        let controller = MemoryController::new();
        let engine = Engine::from_config(&controller, &config);
        let seed: &dyn Fn(&str) -> Restaurant = &|name| controller.add_restaurant(name, true);

        shell(&engine, "memory", Some(seed))
    } else {
        let controller = MongoController::from_config(&config)?;
        controller.ensure_indexes()?;
        let engine = Engine::from_config(&controller, &config);

        shell(&engine, &config.database.mongo_db, None)
    }
}
