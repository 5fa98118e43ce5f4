//! Telnet option filter
//!
//! Strips IAC command sequences from the inbound stream and refuses every
//! option the server offers or requests, which leaves the connection in
//! plain NVT mode. Sequences split across reads are handled by keeping
//! the parser state between calls.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    /// Waiting for the option byte of DO/DONT/WILL/WONT
    Option(u8),
    /// Inside a subnegotiation
    Sub,
    SubIac,
}

/// Output of one [`TelnetFilter::feed`] call
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Payload with negotiation removed
    pub data: Vec<u8>,
    /// Negotiation replies to write back to the server
    pub replies: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: State,
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Filtered {
        let mut out = Filtered {
            data: Vec::with_capacity(input.len()),
            replies: Vec::new(),
        };

        for &byte in input {
            self.state = match self.state {
                State::Data => {
                    if byte == IAC {
                        State::Iac
                    } else {
                        out.data.push(byte);
                        State::Data
                    }
                }
                State::Iac => match byte {
                    // Escaped 0xFF
                    IAC => {
                        out.data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Option(byte),
                    SB => State::Sub,
                    // NOP, GA, AYT and friends carry no payload
                    _ => State::Data,
                },
                State::Option(command) => {
                    match command {
                        DO => out.replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => out.replies.extend_from_slice(&[IAC, DONT, byte]),
                        _ => {}
                    }
                    State::Data
                }
                State::Sub => {
                    if byte == IAC {
                        State::SubIac
                    } else {
                        State::Sub
                    }
                }
                State::SubIac => {
                    if byte == SE {
                        State::Data
                    } else {
                        State::Sub
                    }
                }
            };
        }

        out
    }
}
