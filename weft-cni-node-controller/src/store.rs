use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::reflector::{ReflectHandle, Store};
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::Sender;
use tracing::{error, trace};

use crate::{Error, Result};

const STORE_BUFFER_SIZE: usize = 256;

/// Starts a shared reflector over `api`. Objects removed from the cluster are
/// forwarded to `deleted`, since they never reach a controller.
pub(crate) async fn create_store_and_subscriber<K>(
    api: Api<K>,
    timeout: Option<Duration>,
    deleted: Option<Sender<K>>,
) -> Result<(Store<K>, ReflectHandle<K>)>
where
    K: Resource + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + Send + DeserializeOwned + Hash + Clone,
{
    let (store, writer) = reflector::store_shared(STORE_BUFFER_SIZE);
    let subscriber: ReflectHandle<K> = writer
        .subscribe()
        .ok_or_else(|| Error::StoreCreation("failed to create subscriber".into()))?;

    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect_shared(writer)
        .for_each(move |res| {
            let deleted = deleted.clone();
            async move {
                match res {
                    Ok(watcher::Event::Delete(obj)) => {
                        trace!("received delete event: {:?}", obj);
                        if let Some(tx) = deleted {
                            if let Err(e) = tx.send(obj).await {
                                error!(%e, "failed to send delete event");
                            }
                        }
                    }
                    Ok(ev) => trace!("received event: {:?}", ev),
                    Err(e) => {
                        error!(%e, "unexpected error with node stream")
                    }
                }
            }
        });

    tokio::spawn(stream);
    let wait = store.wait_until_ready();
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::StoreCreation("timed out waiting for store".into()))?
            .map_err(|e| Error::StoreCreation(e.to_string()))?,
        None => wait
            .await
            .map_err(|e| Error::StoreCreation(e.to_string()))?,
    }
    Ok((store, subscriber))
}
