use std::io::{self, BufRead, Write};
use std::path::Path;

use log::debug;

use flatfs::{FileSystem, MAX_FILE_SIZE, NUM_DESCRIPTORS};

/// Line-oriented command interpreter; every failure prints exactly `error`.
/// Output goes through a generic writer so tests can replay transcripts.
pub struct Shell<W: Write> {
    fs: Option<FileSystem>,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(out: W) -> Self {
        Self { fs: None, out }
    }

    /// Interpret commands until `exit` or end of input.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line == "exit" {
                break;
            }
            if line.is_empty() {
                writeln!(self.out)?;
                continue;
            }
            self.dispatch(&line)?;
        }
        self.out.flush()
    }

    fn dispatch(&mut self, line: &str) -> io::Result<()> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        debug!("command: {tokens:?}");

        let Some(&verb) = tokens.first() else {
            return writeln!(self.out, "error");
        };
        if verb != "in" && self.fs.is_none() {
            return writeln!(self.out, "error");
        }

        match verb {
            "in" => self.mount(tokens.get(1).copied()),
            "cr" => self.create(&tokens),
            "de" => self.destroy(&tokens),
            "op" => self.open(&tokens),
            "cl" => self.close(&tokens),
            "wr" => self.write(&tokens),
            "rd" => self.read(&tokens),
            "sk" => self.seek(&tokens),
            "dr" => self.list(),
            "sv" => self.save(&tokens),
            "dump" => self.dump(),
            "desc" => self.dump_descriptors(),
            "oft" => self.dump_oft(),
            _ => writeln!(self.out, "error"),
        }
    }

    /// `in [path]`: restore the image when the path is readable, otherwise
    /// mount a freshly formatted disk. May be repeated mid-session.
    fn mount(&mut self, path: Option<&str>) -> io::Result<()> {
        if let Some(path) = path {
            match FileSystem::restore(Path::new(path)) {
                Ok(fs) => {
                    self.fs = Some(fs);
                    return writeln!(self.out, "disk restored");
                }
                Err(err) => debug!("restore from {path} failed ({err}), formatting instead"),
            }
        }
        self.fs = Some(FileSystem::format());
        writeln!(self.out, "disk initialized")
    }

    fn create(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(name)) = (self.fs.as_mut(), tokens.get(1)) else {
            return writeln!(self.out, "error");
        };
        match fs.create(name) {
            Ok(()) => writeln!(self.out, "{name} created"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn destroy(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(name)) = (self.fs.as_mut(), tokens.get(1)) else {
            return writeln!(self.out, "error");
        };
        match fs.destroy(name) {
            Ok(()) => writeln!(self.out, "{name} destroyed "),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn open(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(name)) = (self.fs.as_mut(), tokens.get(1)) else {
            return writeln!(self.out, "error");
        };
        match fs.open(name) {
            Ok(slot) => writeln!(self.out, "{name} opened {slot}"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn close(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(token)) = (self.fs.as_mut(), tokens.get(1)) else {
            return writeln!(self.out, "error");
        };
        let Ok(slot) = token.parse::<usize>() else {
            return writeln!(self.out, "error");
        };
        match fs.close(slot) {
            Ok(()) => writeln!(self.out, "{token} closed"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    /// `wr slot char count`: write `count` copies of one character.
    fn write(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(slot), Some(data), Some(count)) = (
            self.fs.as_mut(),
            tokens.get(1),
            tokens.get(2),
            tokens.get(3),
        ) else {
            return writeln!(self.out, "error");
        };
        let (Ok(slot), Some(&byte), Ok(count)) = (
            slot.parse::<usize>(),
            data.as_bytes().first(),
            count.parse::<usize>(),
        ) else {
            return writeln!(self.out, "error");
        };
        // No write can land more than one file's worth of bytes.
        let data = vec![byte; count.min(MAX_FILE_SIZE as usize)];
        match fs.write(slot, &data) {
            Ok(written) => writeln!(self.out, "{written} bytes written"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn read(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(slot), Some(count)) =
            (self.fs.as_mut(), tokens.get(1), tokens.get(2))
        else {
            return writeln!(self.out, "error");
        };
        let (Ok(slot), Ok(count)) = (slot.parse::<usize>(), count.parse::<usize>()) else {
            return writeln!(self.out, "error");
        };
        match fs.read(slot, count) {
            Ok((data, _)) => {
                self.out.write_all(&data)?;
                writeln!(self.out)
            }
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn seek(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(slot), Some(position)) =
            (self.fs.as_mut(), tokens.get(1), tokens.get(2))
        else {
            return writeln!(self.out, "error");
        };
        let (Ok(slot), Ok(position)) = (slot.parse::<usize>(), position.parse::<usize>()) else {
            return writeln!(self.out, "error");
        };
        match fs.seek(slot, position) {
            Ok(_) => writeln!(self.out, "position is {position}"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn list(&mut self) -> io::Result<()> {
        let Some(fs) = self.fs.as_mut() else {
            return writeln!(self.out, "error");
        };
        for name in fs.list() {
            write!(self.out, "{name} ")?;
        }
        writeln!(self.out)
    }

    fn save(&mut self, tokens: &[&str]) -> io::Result<()> {
        let (Some(fs), Some(path)) = (self.fs.as_mut(), tokens.get(1)) else {
            return writeln!(self.out, "error");
        };
        match fs.save(Path::new(path)) {
            Ok(()) => writeln!(self.out, "disk saved"),
            Err(_) => writeln!(self.out, "error"),
        }
    }

    fn dump(&mut self) -> io::Result<()> {
        let Some(fs) = self.fs.as_ref() else {
            return writeln!(self.out, "error");
        };
        writeln!(self.out, "CACHE ")?;
        for line in fs.disk().cache_lines() {
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out, "DISK ")?;
        for line in fs.disk().disk_lines() {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    fn dump_descriptors(&mut self) -> io::Result<()> {
        let Some(fs) = self.fs.as_ref() else {
            return writeln!(self.out, "error");
        };
        writeln!(self.out, "FILE DESCRIPTORS ")?;
        for index in 0..NUM_DESCRIPTORS {
            let descriptor = fs.disk().descriptor(index);
            write!(self.out, "DESC {index}: {} ", descriptor.size)?;
            for block in descriptor.blocks {
                write!(self.out, "{block} ")?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn dump_oft(&mut self) -> io::Result<()> {
        let Some(fs) = self.fs.as_ref() else {
            return writeln!(self.out, "error");
        };
        writeln!(self.out, "OPEN FILE TABLE")?;
        for (_, desc, cursor) in fs.open_slots() {
            writeln!(self.out, "DESC INDEX: {desc}")?;
            writeln!(self.out, "BUFFER INDEX: {cursor}")?;
        }
        Ok(())
    }
}
