//! Notification tests.

use std::sync::{Arc, Mutex};

use cutmarks::{BackgroundNotifier, LogNotifier, Notifier, NotifyEvent};

#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<NotifyEvent>>>);

impl Notifier for Collect {
    fn notify(&self, event: NotifyEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn event_messages() {
    let title = "Tagesschau".to_string();
    assert_eq!(
        NotifyEvent::Started {
            title: title.clone()
        }
        .to_string(),
        "starting cutmarks for Tagesschau"
    );
    assert_eq!(
        NotifyEvent::Finished {
            title: title.clone()
        }
        .to_string(),
        "cutmarks finished for Tagesschau"
    );
    assert_eq!(
        NotifyEvent::Aborted { title }.to_string(),
        "cutmarks aborted for Tagesschau"
    );
}

#[test]
fn log_notifier_never_fails() {
    LogNotifier.notify(NotifyEvent::Started {
        title: String::new(),
    });
}

#[test]
fn background_notifier_delivers_in_order() {
    let collect = Collect::default();
    {
        let notifier = BackgroundNotifier::new(collect.clone());
        for title in ["a", "b", "c"] {
            notifier.notify(NotifyEvent::Finished {
                title: title.to_string(),
            });
        }
        // dropping joins the last delivery
    }
    let events = collect.0.lock().unwrap();
    let titles: Vec<_> = events
        .iter()
        .map(|event| match event {
            NotifyEvent::Finished { title } => title.as_str(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(titles, ["a", "b", "c"]);
}
