//! Command line administration of the CleanCity cleanup campaign vote.
//! Talks to the same database as the dashboards, so every change made here
//! is immediately visible to voters.

use chrono::{DateTime, Utc};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use thiserror::Error;

use cleancity_ballot::{config, BallotRegister, Campaign, Config, DbConfig, VoterId};

const PROGRAM_NAME: &str = "cleancity";

const ABOUT_TEXT: &str = "Administer the CleanCity cleanup campaign vote.

Configuration is read from CleanCity.toml and CLEANCITY_* environment variables.

EXIT CODES:
     0: Success.
     1: The request was rejected, e.g. an unknown city.
     2: Configuration or storage failure.";

const LOG_CONFIG: &str = "log4rs.yaml";

const NAME: &str = "NAME";
const CITY: &str = "CITY";
const VOTER: &str = "VOTER";
const WASTE_INDEX: &str = "WASTE_INDEX";
const VOTING_END: &str = "VOTING_END";
const CAMPAIGN_END: &str = "CAMPAIGN_END";

/// Parse an RFC 3339 timestamp, or a bare `YYYY-MM-DD` date meaning midnight UTC.
fn parse_date(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc3339(&format!("{value}T00:00:00Z")))
        .map(|date| date.with_timezone(&Utc))
}

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    let name = Arg::new(NAME)
        .help("City name")
        .action(ArgAction::Set)
        .required(true);
    let city = Arg::new(CITY)
        .help("City name")
        .action(ArgAction::Set)
        .required(true);
    let voter = Arg::new(VOTER)
        .help("Stable voter identity, e.g. an account ID")
        .action(ArgAction::Set)
        .required(true);

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .subcommand(Command::new("cities").about("List cities, most votes first"))
        .subcommand(
            Command::new("add-city")
                .about("Add a city to the ballot")
                .arg(name.clone())
                .arg(
                    Arg::new(WASTE_INDEX)
                        .long("waste-index")
                        .help("Waste index out of 100 (random if omitted)")
                        .value_parser(value_parser!(u32))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("set-waste-index")
                .about("Update a city's waste index")
                .arg(name.clone())
                .arg(
                    Arg::new(WASTE_INDEX)
                        .help("Waste index out of 100")
                        .value_parser(value_parser!(u32))
                        .action(ArgAction::Set)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("delete-city")
                .about("Remove a city and every ballot cast for it")
                .arg(name),
        )
        .subcommand(
            Command::new("vote")
                .about("Cast or change a vote")
                .arg(voter.clone())
                .arg(city.clone()),
        )
        .subcommand(
            Command::new("choice")
                .about("Show which city a voter currently votes for")
                .arg(voter),
        )
        .subcommand(Command::new("tally").about("Show a city's votes").arg(city))
        .subcommand(Command::new("dates").about("Show when voting closes and the campaign ends"))
        .subcommand(
            Command::new("set-dates")
                .about("Set when voting closes and the campaign ends")
                .arg(
                    Arg::new(VOTING_END)
                        .help("End of voting, e.g. 2030-06-01 or 2030-06-01T18:00:00Z")
                        .value_parser(parse_date)
                        .action(ArgAction::Set)
                        .required(true),
                )
                .arg(
                    Arg::new(CAMPAIGN_END)
                        .help("End of the campaign, after the end of voting")
                        .value_parser(parse_date)
                        .action(ArgAction::Set)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("reset")
                .about("Zero all votes, delete all ballots and restart the campaign dates"),
        )
        .subcommand(Command::new("audit").about("Check every vote counter against the ballots"))
}

/// Errors that this program may produce.
#[derive(Debug, Error)]
enum Error {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] figment::Error),
    #[error(transparent)]
    Campaign(#[from] cleancity_ballot::Error),
}

impl Error {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Campaign(err) if !err.is_retryable() => 1,
            _ => 2,
        }
    }
}

/// Fetch an argument that clap has already ensured is present.
fn arg<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, id: &str) -> &'a T {
    args.get_one::<T>(id)
        .unwrap_or_else(|| panic!("`{id}` is required"))
}

/// Run the requested subcommand.
async fn run(args: &ArgMatches) -> Result<(), Error> {
    let figment = config::figment();
    let config = Config::load(&figment)?;
    let db_config = DbConfig::load(&figment)?;
    let store = db_config.connect(&config).await?;
    let register = BallotRegister::new(store.clone(), &config);
    let campaign = Campaign::new(store, &config);

    match args.subcommand() {
        Some(("cities", _)) => {
            for city in campaign.standings().await? {
                println!(
                    "{}: {} vote{} (waste index {}/100)",
                    city.name,
                    city.votes,
                    if city.votes != 1 { "s" } else { "" },
                    city.waste_index
                );
            }
        }
        Some(("add-city", sub)) => {
            let name = arg::<String>(sub, NAME);
            let waste_index = sub.get_one::<u32>(WASTE_INDEX).copied();
            let city = campaign.add_candidate(name, waste_index).await?;
            println!(
                "City '{}' added successfully (waste index {}/100)",
                city.name, city.waste_index
            );
        }
        Some(("set-waste-index", sub)) => {
            let name = arg::<String>(sub, NAME);
            let waste_index = *arg::<u32>(sub, WASTE_INDEX);
            campaign.set_waste_index(name, waste_index).await?;
            println!("Waste index for '{name}' updated successfully");
        }
        Some(("delete-city", sub)) => {
            let name = arg::<String>(sub, NAME);
            let removed = campaign.delete_candidate(name).await?;
            println!("City '{name}' deleted successfully, along with {removed} ballot(s)");
        }
        Some(("vote", sub)) => {
            let voter = VoterId::from(arg::<String>(sub, VOTER).as_str());
            let outcome = register.cast_vote(&voter, arg::<String>(sub, CITY)).await?;
            println!("{outcome}");
        }
        Some(("choice", sub)) => {
            let voter = VoterId::from(arg::<String>(sub, VOTER).as_str());
            match register.current_choice(&voter).await? {
                Some(city) => println!("{voter} votes for {city}"),
                None => println!("{voter} has not voted"),
            }
        }
        Some(("tally", sub)) => {
            let city = arg::<String>(sub, CITY);
            let votes = register.tally(city).await?;
            println!("{city}: {votes} vote{}", if votes != 1 { "s" } else { "" });
        }
        Some(("dates", _)) => {
            let dates = campaign.dates().await?;
            let status = if dates.voting_open(Utc::now()) {
                "open"
            } else {
                "closed"
            };
            println!("Voting ends:   {} ({status})", dates.voting_end);
            println!("Campaign ends: {}", dates.campaign_end);
        }
        Some(("set-dates", sub)) => {
            let voting_end = *arg::<DateTime<Utc>>(sub, VOTING_END);
            let campaign_end = *arg::<DateTime<Utc>>(sub, CAMPAIGN_END);
            campaign.set_dates(voting_end, campaign_end).await?;
            println!("Campaign dates updated successfully");
        }
        Some(("reset", _)) => {
            let removed = campaign.reset().await?;
            println!("Campaign data reset successfully ({removed} ballot(s) removed)");
        }
        Some(("audit", _)) => {
            let mismatches = campaign.audit().await?;
            if mismatches.is_empty() {
                println!("All vote counters match the ballots");
            }
            for mismatch in mismatches {
                println!("{mismatch}");
            }
        }
        _ => unreachable!("clap requires a known subcommand"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = cli().get_matches();

    // Set up logging.
    match log4rs::init_file(LOG_CONFIG, Default::default()) {
        Ok(()) => info!("Initialised logging"),
        Err(err) => eprintln!("Logging disabled, failed to load {LOG_CONFIG}: {err}"),
    }

    let exit_code = match run(&args).await {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            eprintln!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code)
}
