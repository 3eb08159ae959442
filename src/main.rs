use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Local;
use dotenvy::dotenv;
use flight_search::provider::FlightProvider;
use flight_search::storage::KeyValueStore;
use flight_search::{
    open_offline_session, open_session, Config, FilterCriteria, Flight, NotificationEvent,
    SearchForm, SearchSession, SortKey,
};
use futures::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let form = match args.as_slice() {
        [origin, destination, date] => SearchForm::one_way(origin, destination, date),
        [origin, destination, date, return_date] => {
            SearchForm::round_trip(origin, destination, date, return_date)
        }
        _ => bail!("usage: flight_search <ORIGIN> <DESTINATION> <DATE> [RETURN_DATE]"),
    };

    let config = Config::from_env()?;
    if config.offline {
        tracing::info!("offline mode, answering from sample flights");
        let flights = sample_flights(&form);
        run(open_offline_session(&config, flights)?, form).await
    } else {
        run(open_session(&config)?, form).await
    }
}

async fn run<P, S>(session: SearchSession<P, S>, form: SearchForm) -> Result<()>
where
    P: FlightProvider,
    S: KeyValueStore,
{
    let mut notifications = session.notifications().subscribe();

    match session.health().await {
        Ok(health) => tracing::info!(status = %health.status, service = %health.service, "provider reachable"),
        Err(err) => tracing::warn!(error = %err, "health check failed"),
    }

    match session.submit(form).await {
        Ok(summary) => {
            let flights = session.display(&FilterCriteria::default(), SortKey::Price);
            println!("Found {} flights, showing {}", summary.total, flights.len());
            for flight in flights {
                println!(
                    "{:<8} {:<20} {} -> {}  {}  ¥{:.0}",
                    flight.flight_no,
                    flight.airline,
                    flight.origin,
                    flight.destination,
                    flight.departure_time.format("%Y-%m-%d %H:%M"),
                    flight.price
                );
            }
        }
        Err(err) => println!("Search failed: {err}"),
    }

    // Anything shown during the search is already in the channel.
    while let Ok(Some(Ok(event))) =
        tokio::time::timeout(Duration::from_millis(50), notifications.next()).await
    {
        if let NotificationEvent::Shown(notification) = event {
            tracing::warn!(severity = ?notification.severity(), "{}", notification.message());
        }
    }

    let history = session.history().entries();
    if !history.is_empty() {
        println!("\nRecent searches:");
        for entry in history {
            let query = entry.query();
            println!("  {} -> {}  {}", query.origin, query.destination, query.date);
        }
    }
    Ok(())
}

/// Canned results on the requested route, or PEK -> SHA today if the form
/// does not validate (the session reports why on submit).
fn sample_flights(form: &SearchForm) -> Vec<Flight> {
    let (origin, destination, date) = match form.validate() {
        Ok(query) => (query.origin, query.destination, query.date),
        Err(_) => ("PEK".into(), "SHA".into(), Local::now().date_naive()),
    };

    [
        ("Air China", "CA1501", "B-1234", (8, 30), 135, 900.0),
        ("China Eastern", "MU5100", "A330", (7, 0), 140, 500.0),
        ("Hainan Airlines", "HU7605", "B787", (13, 40), 130, 650.0),
        ("Air China", "CA1519", "A321", (21, 15), 135, 1200.0),
    ]
    .into_iter()
    .filter_map(|(airline, flight_no, aircraft, (h, m), minutes, price)| {
        let departure_time = date.and_hms_opt(h, m, 0)?;
        Some(Flight {
            airline: airline.to_string(),
            flight_no: flight_no.to_string(),
            aircraft: aircraft.to_string(),
            origin: origin.clone(),
            destination: destination.clone(),
            departure_time,
            arrival_time: departure_time + chrono::Duration::minutes(minutes),
            punctuality: None,
            price,
            discount: 0.0,
        })
    })
    .collect()
}
