use anyhow::{bail, Context, Result};
use log::*;
use paho_mqtt as mqtt;
use serde::Deserialize;
use solarman_lib::{
    protocol::{DataPoint, Value},
    report::Reporter,
};
use std::{fs::File, time::Duration};

const MQTT_APPENDIX_AVAILABILITY: &str = "availability";

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Random if not set
    pub client_id: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Quality of service code to use
    #[serde(default = "default_qos")]
    qos: u8,
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_topic_prefix() -> String {
    String::from("solarman")
}

fn default_qos() -> u8 {
    0
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

impl MqttConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "invpoll_mqtt.yml";

    pub fn load(path: &str) -> Result<Self> {
        debug!("Loading MQTT config file from {path:?}");
        let file =
            File::open(path).with_context(|| format!("Cannot open MQTT config file {path:?}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse MQTT config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.qos > 2 {
            bail!("Invalid MQTT qos {}, must be 0, 1 or 2", self.qos);
        }
        Ok(())
    }

    pub fn qos(&self) -> i32 {
        self.qos as i32
    }

    pub fn topic(&self, appendix: &str) -> String {
        format!("{}/{}", self.topic_prefix, appendix)
    }
}

/// Publishes every value to `<topic_prefix>/<key>`.
pub struct MqttReporter {
    client: mqtt::Client,
    config: MqttConfig,
}

impl MqttReporter {
    /// Connects to the broker and announces availability.
    pub fn connect(config: MqttConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("invpoll-{:08x}", rand::random::<u32>()));
        let create_opts = mqtt::CreateOptionsBuilder::new()
            .server_uri(&config.url)
            .client_id(client_id)
            .finalize();
        let mut client =
            mqtt::Client::new(create_opts).with_context(|| "Error creating mqtt client")?;

        // Use 5sec timeouts for sync calls.
        client.set_timeout(Duration::from_secs(5));

        let offline = mqtt::Message::new_retained(
            config.topic(MQTT_APPENDIX_AVAILABILITY),
            "offline",
            config.qos(),
        );
        let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
        conn_builder
            .keep_alive_interval(config.keep_alive)
            .clean_session(true)
            .will_message(offline);
        if let Some(user_name) = &config.username {
            conn_builder.user_name(user_name);
        }
        if let Some(password) = &config.password {
            conn_builder.password(password);
        }
        let conn_ops = conn_builder.finalize();

        client
            .connect(conn_ops)
            .with_context(|| format!("Mqtt client unable to connect to {}", config.url))?;
        info!("Connected to MQTT broker {}", config.url);

        let online = mqtt::Message::new_retained(
            config.topic(MQTT_APPENDIX_AVAILABILITY),
            "online",
            config.qos(),
        );
        client
            .publish(online)
            .with_context(|| "Cannot publish mqtt message")?;

        Ok(Self { client, config })
    }

    /// Marks the logger offline and disconnects.
    pub fn disconnect(self) -> Result<()> {
        let offline = mqtt::Message::new_retained(
            self.config.topic(MQTT_APPENDIX_AVAILABILITY),
            "offline",
            self.config.qos(),
        );
        self.client
            .publish(offline)
            .with_context(|| "Cannot publish mqtt message")?;
        self.client
            .disconnect(None)
            .with_context(|| "Error disconnect mqtt client")
    }
}

impl Reporter for MqttReporter {
    type Error = mqtt::Error;

    fn report(&mut self, point: DataPoint, value: Value) -> Result<(), Self::Error> {
        let msg = mqtt::Message::new(
            self.config.topic(point.key()),
            value.to_string(),
            self.config.qos(),
        );
        self.client.publish(msg)
    }
}
