//! Command execution.

use crate::Commands;
use colored::Colorize;
use respline_client::{Client, GeoCoord, GeoPoint, GeoRadiusEntry, GeoUnit};
use respline_protocol::{Command, Reply};
use serde::Serialize;

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => Ok("Already in the REPL".yellow().to_string()),

        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Info { section } => {
            let info = client.info(section.as_deref()).await?;
            if json {
                let fields = respline_client::capability::parse_info(&info);
                return format_json(&fields);
            }
            Ok(info.trim_end().to_string())
        }

        Commands::Version => {
            let caps = client.capabilities().await?;
            if json {
                return format_json(&caps);
            }
            let version = caps
                .version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let geo = if caps.geo_supported {
                "supported".green()
            } else {
                "unsupported".red()
            };
            Ok(format!(
                "{} {}\n{} {}",
                "Server version:".bold(),
                version.cyan(),
                "Geo commands:".bold(),
                geo
            ))
        }

        Commands::Geoadd { key, points } => {
            let points = parse_points(&points)?;
            let added = client.geoadd(&key, &points).await?;
            if json {
                return format_json(&added);
            }
            Ok(format!(
                "{} {} new member(s) to {}",
                "Added".green(),
                added,
                key.cyan()
            ))
        }

        Commands::Geohash { key, members } => {
            let hashes = client.geohash(&key, &members).await?;
            if json {
                return format_json(&hashes);
            }
            let lines = members.iter().zip(hashes).map(|(member, hash)| {
                let value = match hash {
                    Some(hash) => hash.yellow().to_string(),
                    None => nil(),
                };
                format!("{} {}", format!("{}:", member).cyan(), value)
            });
            Ok(lines.collect::<Vec<_>>().join("\n"))
        }

        Commands::Geopos { key, members } => {
            let positions = client.geopos(&key, &members).await?;
            if json {
                return format_json(&positions);
            }
            let lines = members.iter().zip(positions).map(|(member, coord)| {
                let value = match coord {
                    Some(coord) => format_coord(&coord),
                    None => nil(),
                };
                format!("{} {}", format!("{}:", member).cyan(), value)
            });
            Ok(lines.collect::<Vec<_>>().join("\n"))
        }

        Commands::Geodist {
            key,
            member1,
            member2,
            unit,
        } => {
            let dist = client.geodist(&key, &member1, &member2, unit).await?;
            if json {
                return format_json(&dist);
            }
            Ok(match dist {
                Some(dist) => format!("{} {}", dist, unit.unwrap_or_default()),
                None => nil(),
            })
        }

        Commands::Georadius {
            key,
            longitude,
            latitude,
            radius,
            unit,
            options,
        } => {
            let entries = client
                .georadius(&key, longitude, latitude, radius, unit, &options.to_options())
                .await?;
            if json {
                return format_json(&entries);
            }
            Ok(format_entries(&entries, unit))
        }

        Commands::Georadiusbymember {
            key,
            member,
            radius,
            unit,
            options,
        } => {
            let entries = client
                .georadiusbymember(&key, &member, radius, unit, &options.to_options())
                .await?;
            if json {
                return format_json(&entries);
            }
            Ok(format_entries(&entries, unit))
        }

        Commands::Raw { args } => {
            let reply = execute_raw(client, &args).await?;
            if json {
                return format_json(&reply);
            }
            Ok(format_reply(&reply))
        }
    }
}

/// Sends `args` as a single command and returns the raw reply.
pub async fn execute_raw(
    client: &Client,
    args: &[String],
) -> Result<Reply, Box<dyn std::error::Error>> {
    let (name, rest) = args.split_first().ok_or("empty command")?;
    tracing::debug!("Sending raw {} with {} argument(s)", name, rest.len());
    let reply = client.execute(Command::new(name.as_str()).args(rest)).await?;
    Ok(reply)
}

/// Parses `lon lat member` triples.
fn parse_points(args: &[String]) -> Result<Vec<GeoPoint>, Box<dyn std::error::Error>> {
    if args.len() % 3 != 0 {
        return Err("points must be given as <longitude> <latitude> <member> triples".into());
    }
    args.chunks(3)
        .map(|triple| -> Result<GeoPoint, Box<dyn std::error::Error>> {
            let longitude: f64 = triple[0]
                .parse()
                .map_err(|_| format!("invalid longitude: {}", triple[0]))?;
            let latitude: f64 = triple[1]
                .parse()
                .map_err(|_| format!("invalid latitude: {}", triple[1]))?;
            Ok(GeoPoint::new(longitude, latitude, triple[2].as_str()))
        })
        .collect()
}

/// Formats a reply the way `redis-cli` does, with colored errors.
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Error(_) => reply.to_string().red().to_string(),
        Reply::Bulk(None) | Reply::Array(None) => nil(),
        _ => reply.to_string(),
    }
}

fn format_entries(entries: &[GeoRadiusEntry], unit: GeoUnit) -> String {
    if entries.is_empty() {
        return "(empty)".dimmed().to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let mut line = entry.member.cyan().to_string();
            if let Some(dist) = entry.dist {
                line.push_str(&format!(" {} {}", dist, unit));
            }
            if let Some(hash) = entry.hash {
                line.push_str(&format!(" {}", hash.to_string().yellow()));
            }
            if let Some(coord) = &entry.coord {
                line.push_str(&format!(" {}", format_coord(coord)));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_coord(coord: &GeoCoord) -> String {
    format!("({}, {})", coord.longitude, coord.latitude)
}

fn format_json<T: Serialize>(value: &T) -> Result<String, Box<dyn std::error::Error>> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn nil() -> String {
    "(nil)".dimmed().to_string()
}
